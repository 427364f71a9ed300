//! MCP server over streamable HTTP.
//!
//! Requests are answered with plain `application/json` bodies; the server
//! never opens an event stream, so `GET` on the endpoint is refused.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::{
    CallToolParams, CallToolResult, GetPromptParams, GetPromptResult, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ListChanged, ListPromptsResult, ListToolsResult,
    PARSE_ERROR, Prompt, RequestId, SESSION_HEADER, ServerCapabilities, ServerInfo, Tool,
    negotiate_version,
};

/// What an MCP server exposes.
///
/// Implementations answer tool and prompt requests; sessions and the
/// JSON-RPC envelope are handled by the router.
pub trait Handler: Send + Sync + 'static {
    /// Name and version reported during `initialize`.
    fn info(&self) -> ServerInfo;

    /// Optional usage hints reported during `initialize`.
    fn instructions(&self) -> Option<String> {
        None
    }

    /// Tools advertised by `tools/list`, in order.
    fn tools(&self) -> Vec<Tool>;

    /// Execute a tool. Failures are reported inside the result.
    fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> impl Future<Output = CallToolResult> + Send;

    /// Prompt templates advertised by `prompts/list`.
    fn prompts(&self) -> Vec<Prompt> {
        Vec::new()
    }

    /// Render a prompt template.
    fn get_prompt(
        &self,
        name: &str,
        _arguments: Map<String, Value>,
    ) -> impl Future<Output = std::result::Result<GetPromptResult, JsonRpcError>> + Send {
        let error = JsonRpcError::new(INVALID_PARAMS, format!("unknown prompt: {name}"));
        async move { Err(error) }
    }
}

/// Sessions unused for this long are dropped when the next one starts.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

struct Shared<H> {
    handler: H,
    /// Live session ids and when each was last used.
    sessions: RwLock<HashMap<String, Instant>>,
}

/// Build a router serving `handler` at `path`, with and without a trailing slash.
pub fn router<H: Handler>(handler: H, path: &str) -> Router {
    let shared = Arc::new(Shared {
        handler,
        sessions: RwLock::new(HashMap::new()),
    });

    let mut router: Router<Arc<Shared<H>>> = Router::new();
    for route in route_paths(path) {
        router = router.route(
            &route,
            post(handle_post::<H>)
                .delete(handle_delete::<H>)
                .get(handle_get),
        );
    }
    router.with_state(shared)
}

/// Serve `handler` on `listener` until `shutdown` resolves.
pub async fn serve<H, F>(listener: TcpListener, handler: H, path: &str, shutdown: F) -> Result<()>
where
    H: Handler,
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(handler, path);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn route_paths(path: &str) -> Vec<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return vec!["/".to_string()];
    }
    vec![format!("/{trimmed}"), format!("/{trimmed}/")]
}

/// Remove sessions idle for longer than `idle`, returning how many went.
fn prune_idle(sessions: &mut HashMap<String, Instant>, now: Instant, idle: Duration) -> usize {
    let before = sessions.len();
    sessions.retain(|_, last_used| now.saturating_duration_since(*last_used) <= idle);
    before - sessions.len()
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

fn reply(status: StatusCode, response: JsonRpcResponse) -> Response {
    (status, Json(response)).into_response()
}

async fn handle_get() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

async fn handle_delete<H: Handler>(
    State(shared): State<Arc<Shared<H>>>,
    headers: HeaderMap,
) -> StatusCode {
    let Some(session) = session_id(&headers) else {
        return StatusCode::BAD_REQUEST;
    };
    if shared.sessions.write().await.remove(session).is_some() {
        info!(session, "session terminated");
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn handle_post<H: Handler>(
    State(shared): State<Arc<Shared<H>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "unparseable request body");
            let error = JsonRpcError::new(PARSE_ERROR, format!("parse error: {e}"));
            return reply(StatusCode::BAD_REQUEST, JsonRpcResponse::failure(None, error));
        }
    };

    let request = match serde_json::from_value::<JsonRpcRequest>(value) {
        Ok(request) if request.jsonrpc == "2.0" => request,
        _ => {
            let error = JsonRpcError::new(INVALID_REQUEST, "not a JSON-RPC 2.0 request");
            return reply(StatusCode::BAD_REQUEST, JsonRpcResponse::failure(None, error));
        }
    };

    let Some(id) = request.id.clone() else {
        debug!(method = %request.method, "notification received");
        return StatusCode::ACCEPTED.into_response();
    };

    if request.method == "initialize" {
        return initialize(&shared, id, &request).await;
    }

    let Some(session) = session_id(&headers) else {
        let error = JsonRpcError::new(INVALID_REQUEST, "missing session id header");
        return reply(StatusCode::BAD_REQUEST, JsonRpcResponse::failure(Some(id), error));
    };
    let known = match shared.sessions.write().await.get_mut(session) {
        Some(last_used) => {
            *last_used = Instant::now();
            true
        }
        None => false,
    };
    if !known {
        let error = JsonRpcError::new(INVALID_REQUEST, format!("unknown session: {session}"));
        return reply(StatusCode::NOT_FOUND, JsonRpcResponse::failure(Some(id), error));
    }

    let response = dispatch(&shared.handler, id, &request).await;
    reply(StatusCode::OK, response)
}

async fn initialize<H: Handler>(
    shared: &Shared<H>,
    id: RequestId,
    request: &JsonRpcRequest,
) -> Response {
    let params: InitializeParams = match request.parse_params() {
        Ok(params) => params,
        Err(error) => return reply(StatusCode::OK, JsonRpcResponse::failure(Some(id), error)),
    };

    let session = Uuid::new_v4().to_string();
    {
        let mut sessions = shared.sessions.write().await;
        let now = Instant::now();
        let expired = prune_idle(&mut sessions, now, SESSION_IDLE_TIMEOUT);
        if expired > 0 {
            info!(expired, "dropped idle sessions");
        }
        sessions.insert(session.clone(), now);
    }

    let prompts = (!shared.handler.prompts().is_empty()).then(ListChanged::default);
    let result = InitializeResult {
        protocol_version: negotiate_version(&params.protocol_version).to_string(),
        capabilities: ServerCapabilities {
            tools: Some(ListChanged::default()),
            prompts,
        },
        server_info: shared.handler.info(),
        instructions: shared.handler.instructions(),
    };

    info!(
        session = %session,
        client = %params.client_info.name,
        protocol = %result.protocol_version,
        "session initialized"
    );

    let mut response = reply(StatusCode::OK, JsonRpcResponse::success(id, result));
    if let Ok(value) = HeaderValue::from_str(&session) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

async fn dispatch<H: Handler>(
    handler: &H,
    id: RequestId,
    request: &JsonRpcRequest,
) -> JsonRpcResponse {
    let outcome = match request.method.as_str() {
        "ping" => Ok(Value::Object(Map::new())),
        "tools/list" => encode(ListToolsResult {
            tools: handler.tools(),
            next_cursor: None,
        }),
        "tools/call" => match request.parse_params::<CallToolParams>() {
            Ok(params) => {
                debug!(tool = %params.name, "dispatching tool call");
                let arguments = params.arguments.unwrap_or_default();
                encode(handler.call_tool(&params.name, arguments).await)
            }
            Err(error) => Err(error),
        },
        "prompts/list" => encode(ListPromptsResult {
            prompts: handler.prompts(),
            next_cursor: None,
        }),
        "prompts/get" => match request.parse_params::<GetPromptParams>() {
            Ok(params) => match handler.get_prompt(&params.name, params.arguments).await {
                Ok(result) => encode(result),
                Err(error) => Err(error),
            },
            Err(error) => Err(error),
        },
        other => Err(JsonRpcError::method_not_found(other)),
    };

    match outcome {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => JsonRpcResponse::failure(Some(id), error),
    }
}

fn encode(value: impl Serialize) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_cover_both_slash_forms() {
        assert_eq!(route_paths("/mcp/"), vec!["/mcp", "/mcp/"]);
        assert_eq!(route_paths("mcp"), vec!["/mcp", "/mcp/"]);
        assert_eq!(route_paths("/"), vec!["/"]);
    }

    #[test]
    fn idle_sessions_are_pruned() {
        let start = Instant::now();
        let idle = Duration::from_secs(60);
        let mut sessions = HashMap::from([
            ("stale".to_string(), start),
            ("fresh".to_string(), start + Duration::from_secs(90)),
        ]);

        let removed = prune_idle(&mut sessions, start + Duration::from_secs(100), idle);
        assert_eq!(removed, 1);
        assert!(sessions.contains_key("fresh"));
        assert!(!sessions.contains_key("stale"));

        assert_eq!(prune_idle(&mut sessions, start + Duration::from_secs(100), idle), 0);
    }

    #[test]
    fn session_header_lookup() {
        let mut headers = HeaderMap::new();
        assert!(session_id(&headers).is_none());
        headers.insert(SESSION_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(session_id(&headers), Some("abc"));
    }
}
