//! MCP client over streamable HTTP (connect, call, lifecycle).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, GetPromptParams, GetPromptResult, InitializeParams,
    InitializeResult, JsonRpcRequest, JsonRpcResponse, ListPromptsResult, ListToolsResult,
    PROTOCOL_VERSION_HEADER, PaginatedParams, Prompt, RequestId, SESSION_HEADER, Tool,
};

/// Timeout for establishing the HTTP connection to the server.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Maximum response body size (1MB).
/// Sized for large tool outputs (full-table query results).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// State agreed with the server during `initialize`.
#[derive(Debug, Clone)]
struct Negotiated {
    session_id: Option<String>,
    result: InitializeResult,
}

/// Handle to a remote MCP server reachable over HTTP.
pub struct Client {
    http: reqwest::Client,
    endpoint: String,
    next_id: AtomicI64,
    negotiated: RwLock<Option<Negotiated>>,
}

impl Client {
    /// Create a client for the given endpoint URL without contacting it.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            next_id: AtomicI64::new(1),
            negotiated: RwLock::new(None),
        })
    }

    /// Create a client and run the initialize handshake.
    pub async fn connect(endpoint: impl Into<String>) -> Result<Self> {
        let client = Self::new(endpoint)?;
        client.initialize().await?;
        Ok(client)
    }

    /// The endpoint URL this client talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Initialize the session (must be called before other operations).
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let id = self.next_request_id();
        let request =
            JsonRpcRequest::new(id.clone(), "initialize").with_params(InitializeParams::default());

        let response = self.post(&request).await?;
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let value = Self::read_response(response, &id).await?.into_result()?;
        let result: InitializeResult = serde_json::from_value(value)?;

        info!(
            endpoint = %self.endpoint,
            server = %result.server_info.name,
            protocol = %result.protocol_version,
            session = session_id.as_deref().unwrap_or("-"),
            "connected to MCP server"
        );

        *self.negotiated.write().await = Some(Negotiated {
            session_id,
            result: result.clone(),
        });

        self.notify("notifications/initialized").await?;
        Ok(result)
    }

    /// Check if the session is initialized.
    pub async fn is_initialized(&self) -> bool {
        self.negotiated.read().await.is_some()
    }

    /// Session id assigned by the server, if it issued one.
    pub async fn session_id(&self) -> Option<String> {
        self.negotiated
            .read()
            .await
            .as_ref()
            .and_then(|n| n.session_id.clone())
    }

    /// Get server info (after initialization).
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.negotiated
            .read()
            .await
            .as_ref()
            .map(|n| n.result.clone())
    }

    /// List every tool the server offers, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.ensure_initialized().await?;

        let mut tools = Vec::new();
        let mut cursor = None;
        loop {
            let page: ListToolsResult = self
                .request("tools/list", Some(PaginatedParams { cursor }))
                .await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(tools)
    }

    /// Call a tool by name.
    ///
    /// A result flagged `isError` is still a successful call: the error text
    /// travels in the content.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult> {
        self.ensure_initialized().await?;

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.request("tools/call", Some(params)).await
    }

    /// List the prompt templates the server offers.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.ensure_initialized().await?;

        let mut prompts = Vec::new();
        let mut cursor = None;
        loop {
            let page: ListPromptsResult = self
                .request("prompts/list", Some(PaginatedParams { cursor }))
                .await?;
            prompts.extend(page.prompts);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(prompts)
    }

    /// Render a prompt template with the given arguments.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<GetPromptResult> {
        self.ensure_initialized().await?;

        let params = GetPromptParams {
            name: name.to_string(),
            arguments,
        };
        self.request("prompts/get", Some(params)).await
    }

    /// Round-trip a `ping`.
    pub async fn ping(&self) -> Result<()> {
        self.ensure_initialized().await?;
        let _: Value = self.request("ping", None::<()>).await?;
        Ok(())
    }

    /// End the session on the server. Safe to call on an uninitialized client.
    pub async fn close(&self) -> Result<()> {
        let Some(negotiated) = self.negotiated.write().await.take() else {
            return Ok(());
        };
        let Some(session_id) = negotiated.session_id else {
            return Ok(());
        };

        let response = self
            .http
            .delete(&self.endpoint)
            .header(SESSION_HEADER, &session_id)
            .send()
            .await?;

        // Servers may refuse explicit termination (405); the session still ends here.
        debug!(session = %session_id, status = %response.status(), "session closed");
        Ok(())
    }

    // --- Internal methods ---

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized().await {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_request_id();
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p);
        }

        debug!(method, id = ?id, "sending request");
        let had_session = self.session_id().await.is_some();
        let response = match self.post(&request).await {
            // The server forgot our session (restart or idle expiry): start a
            // new one and retry once.
            Err(Error::Status { status: 404, .. }) if had_session => {
                warn!(endpoint = %self.endpoint, method, "session expired; re-initializing");
                *self.negotiated.write().await = None;
                self.initialize().await?;
                self.post(&request).await?
            }
            other => other?,
        };
        let result_value = Self::read_response(response, &id).await?.into_result()?;
        let result: R = serde_json::from_value(result_value)?;

        Ok(result)
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let notification = JsonRpcRequest::notification(method);
        self.post(&notification).await?;
        Ok(())
    }

    async fn post(&self, message: &JsonRpcRequest) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(message);

        if let Some(negotiated) = self.negotiated.read().await.as_ref() {
            request = request.header(
                PROTOCOL_VERSION_HEADER,
                negotiated.result.protocol_version.as_str(),
            );
            if let Some(session_id) = &negotiated.session_id {
                request = request.header(SESSION_HEADER, session_id.as_str());
            }
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn read_response(response: reqwest::Response, id: &RequestId) -> Result<JsonRpcResponse> {
        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let body = response.text().await?;

        // Check output size
        if body.len() > MAX_OUTPUT_SIZE {
            return Err(Error::OutputTooLarge {
                size: body.len(),
                max: MAX_OUTPUT_SIZE,
            });
        }

        let response = if is_event_stream {
            find_event_response(&body, id)?
        } else {
            serde_json::from_str::<JsonRpcResponse>(&body)?
        };

        // Verify response ID matches
        if response.id.as_ref() != Some(id) {
            return Err(Error::InvalidResponse(format!(
                "response ID mismatch: expected {id:?}, got {:?}",
                response.id
            )));
        }

        Ok(response)
    }
}

/// Split a `text/event-stream` body into the data payloads of its events.
fn event_payloads(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut data: Vec<&str> = Vec::new();

    for line in body.lines() {
        if line.is_empty() {
            if !data.is_empty() {
                events.push(data.join("\n"));
                data.clear();
            }
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if !data.is_empty() {
        events.push(data.join("\n"));
    }

    events
}

/// Find the JSON-RPC response answering `id` among the events of a stream.
fn find_event_response(body: &str, id: &RequestId) -> Result<JsonRpcResponse> {
    event_payloads(body)
        .iter()
        .filter_map(|payload| serde_json::from_str::<JsonRpcResponse>(payload).ok())
        .find(|r| r.id.as_ref() == Some(id) && (r.result.is_some() || r.error.is_some()))
        .ok_or_else(|| {
            Error::InvalidResponse(format!("event stream carried no response for {id:?}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_payloads_split_on_blank_lines() {
        let body = "event: message\ndata: {\"a\":1}\n\ndata: first\ndata: second\n\n";
        let events = event_payloads(body);
        assert_eq!(events, vec!["{\"a\":1}".to_string(), "first\nsecond".to_string()]);
    }

    #[test]
    fn event_stream_response_matched_by_id() {
        let body = concat!(
            "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{}}\r\n\r\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"tools\":[]}}\r\n\r\n",
        );
        let response = find_event_response(body, &RequestId::Number(7)).unwrap();
        assert!(response.result.is_some());
    }

    #[test]
    fn event_stream_without_answer_is_invalid() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{}}\n\n";
        let err = find_event_response(body, &RequestId::Number(3)).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn calls_before_initialize_are_rejected() {
        let client = Client::new("http://127.0.0.1:9/mcp/").unwrap();
        assert!(!client.is_initialized().await);
        let err = client.call_tool("schema_discovery", None).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
        client.close().await.unwrap();
    }
}
