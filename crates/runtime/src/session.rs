//! Conversation session: the user → model → tools → model turn loop.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::model::{
    Backend, Conversation, ConversationError, Message, ModelError, ModelRequest, ModelResponse,
    ToolCall, ToolChoice, ToolResult, ToolSpec,
};
use crate::tools::{ToolError, ToolHost};

/// Default system instruction sent with every completion request.
pub const SYSTEM_PROMPT: &str = "You are a master SQLite assistant. \
Your job is to use the tools at your disposal to execute SQL queries and provide the results to the user.";

/// When to ask the model for a follow-up after tool calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUp {
    /// One follow-up completion after every answered tool call.
    #[default]
    PerCall,
    /// One follow-up completion after the whole batch has been answered.
    AfterBatch,
}

impl FromStr for FollowUp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_call" => Ok(Self::PerCall),
            "after_batch" => Ok(Self::AfterBatch),
            other => Err(format!(
                "unknown follow-up policy '{other}' (expected per_call or after_batch)"
            )),
        }
    }
}

/// Why a turn ended early.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("tool discovery failed: {0}")]
    Discovery(#[from] ToolError),

    #[error("model call failed: {0}")]
    Model(#[from] ModelError),

    #[error("malformed arguments for tool {tool} (call {call_id}): {source}")]
    MalformedArguments {
        call_id: String,
        tool: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("history rejected message: {0}")]
    History(#[from] ConversationError),
}

/// What a completed turn produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnSummary {
    /// Assistant texts appended during the turn, in order.
    pub replies: Vec<String>,
    /// Tool calls that returned a result.
    pub invoked: usize,
    /// Tool calls whose invocation failed and were skipped.
    pub failed: usize,
}

/// A conversation with one model and one tool host.
pub struct Session<B, H> {
    backend: B,
    tools: H,
    system: String,
    history: Conversation,
    follow_up: FollowUp,
}

impl<B: Backend, H: ToolHost> Session<B, H> {
    pub fn new(backend: B, tools: H) -> Self {
        Self {
            backend,
            tools,
            system: SYSTEM_PROMPT.to_string(),
            history: Conversation::new(),
            follow_up: FollowUp::default(),
        }
    }

    /// Set the system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = follow_up;
        self
    }

    pub fn history(&self) -> &[Message] {
        self.history.messages()
    }

    pub fn tools(&self) -> &H {
        &self.tools
    }

    /// Run one turn for `input`.
    ///
    /// The user message is always kept in history, even when the turn fails.
    pub async fn process_query(&mut self, input: &str) -> Result<TurnSummary, TurnError> {
        self.history.push(Message::user(input))?;

        let specs = self.tools.list_tools().await.inspect_err(|e| {
            error!(error = %e, "tool discovery failed");
        })?;

        info!("requesting completion");
        let response = self.complete(&specs).await.inspect_err(|e| {
            error!(error = %e, "model call failed");
        })?;
        debug!(message = ?response.message, usage = ?response.usage, "model response");

        let calls = response.message.tool_calls();
        if calls.is_empty() {
            let text = response.message.text();
            self.history.push(Message::assistant(text.clone()))?;
            return Ok(TurnSummary {
                replies: vec![text],
                ..TurnSummary::default()
            });
        }

        let decoded = decode_all(calls)?;
        let preamble = response.message.text();
        let mut summary = TurnSummary::default();

        for (call, arguments) in decoded {
            let shown = Value::Object(arguments.clone());
            info!(tool = %call.name, args = %shown, "calling tool");
            let content = match self.tools.call_tool(&call.name, arguments).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool call failed");
                    summary.failed += 1;
                    continue;
                }
            };
            debug!(tool = %call.name, result = %content, "tool call result");
            summary.invoked += 1;

            let result = ToolResult {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                content,
            };
            self.history.push(Message::tool_request(preamble.clone(), call))?;
            self.history.push(Message::tool_result(result))?;

            if self.follow_up == FollowUp::PerCall
                && !self.request_follow_up(&specs, &mut summary).await?
            {
                return Ok(summary);
            }
        }

        if self.follow_up == FollowUp::AfterBatch && summary.invoked > 0 {
            self.request_follow_up(&specs, &mut summary).await?;
        }

        Ok(summary)
    }

    /// Ask for a continuation over the current history and append its text.
    ///
    /// Returns `false` when the model call failed; the failure is logged and
    /// the turn should stop.
    async fn request_follow_up(
        &mut self,
        specs: &[ToolSpec],
        summary: &mut TurnSummary,
    ) -> Result<bool, TurnError> {
        info!("requesting follow-up completion");
        match self.complete(specs).await {
            Ok(response) => {
                let text = response.message.text();
                self.history.push(Message::assistant(text.clone()))?;
                summary.replies.push(text);
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "follow-up model call failed");
                Ok(false)
            }
        }
    }

    async fn complete(&self, tools: &[ToolSpec]) -> Result<ModelResponse, ModelError> {
        self.backend
            .call(ModelRequest {
                system: Some(&self.system),
                messages: self.history.messages(),
                tools,
                tool_choice: ToolChoice::Auto,
            })
            .await
    }
}

/// Decode every call's arguments up front so a malformed payload stops the
/// turn before any tool runs.
fn decode_all(calls: Vec<ToolCall>) -> Result<Vec<(ToolCall, Map<String, Value>)>, TurnError> {
    calls
        .into_iter()
        .map(|call| match call.decode_arguments() {
            Ok(arguments) => Ok((call, arguments)),
            Err(source) => {
                error!(
                    tool = %call.name,
                    call_id = %call.id,
                    error = %source,
                    "malformed tool arguments"
                );
                Err(TurnError::MalformedArguments {
                    call_id: call.id,
                    tool: call.name,
                    source,
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Part, Role, Usage};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned model replies and records the history length it saw.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<Message, ModelError>>>,
        seen: Mutex<Vec<usize>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<Message, ModelError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Backend for ScriptedBackend {
        async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
            assert_eq!(request.system, Some(SYSTEM_PROMPT));
            assert_eq!(request.tool_choice, ToolChoice::Auto);
            self.seen.lock().unwrap().push(request.messages.len());
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(Ok(message)) => Ok(ModelResponse {
                    message,
                    usage: Usage::default(),
                }),
                Some(Err(e)) => Err(e),
                None => Err(ModelError::Api("script exhausted".into())),
            }
        }
    }

    /// Tool host whose listed tools all succeed except those named in `broken`.
    #[derive(Default)]
    struct ScriptedTools {
        discovery_fails: bool,
        broken: Vec<&'static str>,
        calls: Mutex<Vec<(String, Map<String, Value>)>>,
    }

    impl ToolHost for ScriptedTools {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
            if self.discovery_fails {
                return Err(ToolError::Execution("connection refused".into()));
            }
            Ok(vec![ToolSpec {
                name: "query_data".into(),
                description: "Execute SQL queries safely.".into(),
                schema: json!({ "type": "object" }),
            }])
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: Map<String, Value>,
        ) -> Result<String, ToolError> {
            self.calls.lock().unwrap().push((name.to_string(), arguments));
            if self.broken.iter().any(|b| *b == name) {
                return Err(ToolError::Execution(format!("{name} exploded")));
            }
            Ok(format!("result of {name}"))
        }
    }

    fn requesting(calls: &[(&str, &str, &str)]) -> Message {
        Message {
            role: Role::Assistant,
            parts: calls
                .iter()
                .map(|(id, name, args)| Part::ToolCall(ToolCall::new(*id, *name, *args)))
                .collect(),
        }
    }

    fn session(
        replies: Vec<Result<Message, ModelError>>,
        tools: ScriptedTools,
    ) -> Session<ScriptedBackend, ScriptedTools> {
        Session::new(ScriptedBackend::new(replies), tools)
    }

    fn roles(session: &Session<ScriptedBackend, ScriptedTools>) -> Vec<Role> {
        session.history().iter().map(|m| m.role).collect()
    }

    #[tokio::test]
    async fn user_message_survives_discovery_failure() {
        let tools = ScriptedTools {
            discovery_fails: true,
            ..Default::default()
        };
        let mut session = session(vec![], tools);

        let err = session.process_query("list tables").await.unwrap_err();
        assert!(matches!(err, TurnError::Discovery(_)));
        assert_eq!(session.history(), &[Message::user("list tables")]);
        assert!(session.backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn model_failure_aborts_turn() {
        let mut session = session(
            vec![Err(ModelError::Network("timed out".into()))],
            ScriptedTools::default(),
        );

        let err = session.process_query("hi").await.unwrap_err();
        assert!(matches!(err, TurnError::Model(ModelError::Network(_))));
        assert_eq!(roles(&session), vec![Role::User]);
    }

    #[tokio::test]
    async fn plain_answer_appends_one_message() {
        let mut session = session(
            vec![Ok(Message::assistant("Hello! Ask me about the database."))],
            ScriptedTools::default(),
        );

        let summary = session.process_query("hi").await.unwrap();
        assert_eq!(summary.replies, vec!["Hello! Ask me about the database."]);
        assert_eq!(summary.invoked, 0);
        assert_eq!(roles(&session), vec![Role::User, Role::Assistant]);
        assert!(session.tools.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn each_call_gets_restatement_result_and_follow_up() {
        let mut session = session(
            vec![
                Ok(requesting(&[
                    ("c1", "query_data", r#"{"sql":"SELECT 1"}"#),
                    ("c2", "column_summary", r#"{"table_name":"albums"}"#),
                ])),
                Ok(Message::assistant("first follow-up")),
                Ok(Message::assistant("second follow-up")),
            ],
            ScriptedTools::default(),
        );

        let summary = session.process_query("go").await.unwrap();
        assert_eq!(summary.replies, vec!["first follow-up", "second follow-up"]);
        assert_eq!(summary.invoked, 2);

        let history = session.history();
        assert_eq!(history.len(), 1 + 3 * 2);
        assert_eq!(
            roles(&session)[1..],
            [
                Role::Assistant,
                Role::Tool,
                Role::Assistant,
                Role::Assistant,
                Role::Tool,
                Role::Assistant
            ]
        );
        let restated = ToolCall::new("c1", "query_data", r#"{"sql":"SELECT 1"}"#);
        assert_eq!(history[1].tool_calls(), vec![restated]);
        assert_eq!(
            history[2].parts,
            vec![Part::ToolResult(ToolResult {
                tool_call_id: "c1".into(),
                name: "query_data".into(),
                content: "result of query_data".into(),
            })]
        );
        assert_eq!(history[4].tool_calls()[0].id, "c2");

        // Follow-ups see the history up to their own tool result.
        assert_eq!(*session.backend.seen.lock().unwrap(), vec![1, 3, 6]);

        let calls = session.tools.calls.lock().unwrap();
        assert_eq!(calls[0].1["sql"], "SELECT 1");
        assert_eq!(calls[1].0, "column_summary");
    }

    #[tokio::test]
    async fn restated_call_carries_response_text() {
        let mut request = requesting(&[("c1", "schema_discovery", "")]);
        request.parts.insert(0, Part::Text("Let me look.".into()));
        let mut session = session(
            vec![Ok(request), Ok(Message::assistant("done"))],
            ScriptedTools::default(),
        );

        session.process_query("schema?").await.unwrap();
        assert_eq!(session.history()[1].text(), "Let me look.");
        assert!(session.tools.calls.lock().unwrap()[0].1.is_empty());
    }

    #[tokio::test]
    async fn failing_call_is_skipped() {
        let tools = ScriptedTools {
            broken: vec!["preview_table"],
            ..Default::default()
        };
        let mut session = session(
            vec![
                Ok(requesting(&[
                    ("c1", "preview_table", r#"{"table_name":"albums"}"#),
                    ("c2", "query_data", r#"{"sql":"SELECT 2"}"#),
                ])),
                Ok(Message::assistant("only the query worked")),
            ],
            tools,
        );

        let summary = session.process_query("go").await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.invoked, 1);
        assert_eq!(session.history().len(), 1 + 3);
        assert_eq!(session.history()[1].tool_calls()[0].id, "c2");
        assert_eq!(session.tools.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn malformed_arguments_abort_before_any_tool_runs() {
        let mut session = session(
            vec![Ok(requesting(&[
                ("c1", "query_data", r#"{"sql":"SELECT 1"}"#),
                ("c2", "query_data", r#"{"sql": SELECT"#),
            ]))],
            ScriptedTools::default(),
        );

        let err = session.process_query("go").await.unwrap_err();
        match err {
            TurnError::MalformedArguments { call_id, tool, .. } => {
                assert_eq!(call_id, "c2");
                assert_eq!(tool, "query_data");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(roles(&session), vec![Role::User]);
        assert!(session.tools.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn follow_up_failure_ends_turn_with_partial_summary() {
        let mut session = session(
            vec![
                Ok(requesting(&[
                    ("c1", "query_data", "{}"),
                    ("c2", "query_data", "{}"),
                ])),
                Err(ModelError::Api("rate limited".into())),
            ],
            ScriptedTools::default(),
        );

        let summary = session.process_query("go").await.unwrap();
        assert!(summary.replies.is_empty());
        assert_eq!(summary.invoked, 1);
        assert_eq!(roles(&session), vec![Role::User, Role::Assistant, Role::Tool]);
        assert_eq!(session.tools.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn after_batch_asks_once() {
        let mut session = session(
            vec![
                Ok(requesting(&[
                    ("c1", "query_data", "{}"),
                    ("c2", "query_data", "{}"),
                ])),
                Ok(Message::assistant("both done")),
            ],
            ScriptedTools::default(),
        )
        .with_follow_up(FollowUp::AfterBatch);

        let summary = session.process_query("go").await.unwrap();
        assert_eq!(summary.replies, vec!["both done"]);
        assert_eq!(session.history().len(), 1 + 2 * 2 + 1);
        assert_eq!(*session.backend.seen.lock().unwrap(), vec![1, 5]);
    }

    #[tokio::test]
    async fn after_batch_skips_follow_up_when_nothing_ran() {
        let tools = ScriptedTools {
            broken: vec!["query_data"],
            ..Default::default()
        };
        let mut session = session(vec![Ok(requesting(&[("c1", "query_data", "{}")]))], tools)
            .with_follow_up(FollowUp::AfterBatch);

        let summary = session.process_query("go").await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(roles(&session), vec![Role::User]);
        assert_eq!(session.backend.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_accumulates_across_turns() {
        let mut session = session(
            vec![Ok(Message::assistant("one")), Ok(Message::assistant("two"))],
            ScriptedTools::default(),
        );
        session.process_query("first").await.unwrap();
        session.process_query("second").await.unwrap();
        assert_eq!(session.history().len(), 4);
        assert_eq!(*session.backend.seen.lock().unwrap(), vec![1, 3]);
    }

    #[test]
    fn follow_up_parses_config_values() {
        assert_eq!("per_call".parse::<FollowUp>().unwrap(), FollowUp::PerCall);
        assert_eq!(" AFTER_BATCH ".parse::<FollowUp>().unwrap(), FollowUp::AfterBatch);
        assert!("sometimes".parse::<FollowUp>().is_err());
    }
}
