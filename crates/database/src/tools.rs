//! The SQLite tool set served over MCP.

use std::sync::Arc;

use mcp::{
    CallToolResult, GetPromptResult, Handler, INVALID_PARAMS, JsonRpcError, Prompt,
    PromptArgument, PromptMessage, PromptRole, ServerInfo, Tool, ToolContent,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{error, info, warn};

use crate::{Database, Result};

pub const QUERY_DATA: &str = "query_data";
pub const PREVIEW_TABLE: &str = "preview_table";
pub const COLUMN_SUMMARY: &str = "column_summary";
pub const SCHEMA_DISCOVERY: &str = "schema_discovery";
pub const EXAMPLE_PROMPT: &str = "example_prompt";

const DEFAULT_PREVIEW_LIMIT: i64 = 5;

#[derive(Debug, Deserialize)]
struct QueryArgs {
    sql: String,
}

#[derive(Debug, Deserialize)]
struct TableArgs {
    table_name: String,
}

#[derive(Debug, Deserialize)]
struct PreviewArgs {
    table_name: String,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    DEFAULT_PREVIEW_LIMIT
}

#[derive(Debug, Deserialize)]
struct ReviewArgs {
    code: String,
}

/// MCP handler exposing [`Database`] operations as tools.
#[derive(Debug, Clone)]
pub struct SqlTools {
    db: Arc<Database>,
}

impl SqlTools {
    pub fn new(db: Database) -> Self {
        Self { db: Arc::new(db) }
    }

    /// Run a database operation on the blocking pool, flattening failures
    /// into `Error: ...` text.
    async fn run<F>(&self, tool: &'static str, op: F) -> CallToolResult
    where
        F: FnOnce(&Database) -> Result<String> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let outcome = tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(crate::Error::from)
            .and_then(|r| r);

        match outcome {
            Ok(text) => CallToolResult::text(text),
            Err(e) => {
                error!(tool, error = %e, "tool failed");
                CallToolResult::error(format!("Error: {e}"))
            }
        }
    }
}

fn decode<T: DeserializeOwned>(
    tool: &str,
    arguments: Map<String, Value>,
) -> std::result::Result<T, CallToolResult> {
    serde_json::from_value(Value::Object(arguments)).map_err(|e| {
        warn!(tool, error = %e, "invalid tool arguments");
        CallToolResult::error(format!("Error: invalid arguments for {tool}: {e}"))
    })
}

impl Handler for SqlTools {
    fn info(&self) -> ServerInfo {
        ServerInfo {
            name: "sqlchat".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    fn instructions(&self) -> Option<String> {
        Some(format!(
            "SQLite tools for the database at {}.",
            self.db.path().display()
        ))
    }

    fn tools(&self) -> Vec<Tool> {
        vec![
            Tool {
                name: QUERY_DATA.to_string(),
                description: Some("Execute SQL queries safely.".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "sql": { "type": "string", "description": "SQL statement to execute" }
                    },
                    "required": ["sql"]
                }),
            },
            Tool {
                name: PREVIEW_TABLE.to_string(),
                description: Some("Preview the first few rows of a table.".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "table_name": { "type": "string" },
                        "limit": { "type": "integer", "default": DEFAULT_PREVIEW_LIMIT }
                    },
                    "required": ["table_name"]
                }),
            },
            Tool {
                name: COLUMN_SUMMARY.to_string(),
                description: Some("Get column names and types for a table.".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "table_name": { "type": "string" }
                    },
                    "required": ["table_name"]
                }),
            },
            Tool {
                name: SCHEMA_DISCOVERY.to_string(),
                description: Some(
                    "List all tables and their columns in the database.".to_string(),
                ),
                input_schema: json!({ "type": "object", "properties": {} }),
            },
        ]
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> CallToolResult {
        match name {
            QUERY_DATA => match decode::<QueryArgs>(QUERY_DATA, arguments) {
                Ok(args) => self.run(QUERY_DATA, move |db| db.query_data(&args.sql)).await,
                Err(result) => result,
            },
            PREVIEW_TABLE => match decode::<PreviewArgs>(PREVIEW_TABLE, arguments) {
                Ok(args) => {
                    self.run(PREVIEW_TABLE, move |db| {
                        db.preview_table(&args.table_name, args.limit)
                    })
                    .await
                }
                Err(result) => result,
            },
            COLUMN_SUMMARY => match decode::<TableArgs>(COLUMN_SUMMARY, arguments) {
                Ok(args) => {
                    self.run(COLUMN_SUMMARY, move |db| db.column_summary(&args.table_name))
                        .await
                }
                Err(result) => result,
            },
            SCHEMA_DISCOVERY => self.run(SCHEMA_DISCOVERY, Database::schema_discovery).await,
            other => {
                warn!(tool = other, "unknown tool requested");
                CallToolResult::error(format!("Error: unknown tool: {other}"))
            }
        }
    }

    fn prompts(&self) -> Vec<Prompt> {
        vec![Prompt {
            name: EXAMPLE_PROMPT.to_string(),
            description: Some("Ask for a review of a piece of code.".to_string()),
            arguments: vec![PromptArgument {
                name: "code".to_string(),
                description: None,
                required: true,
            }],
        }]
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> std::result::Result<GetPromptResult, JsonRpcError> {
        if name != EXAMPLE_PROMPT {
            return Err(JsonRpcError::new(
                INVALID_PARAMS,
                format!("unknown prompt: {name}"),
            ));
        }
        let args: ReviewArgs = serde_json::from_value(Value::Object(arguments))
            .map_err(|e| JsonRpcError::new(INVALID_PARAMS, e.to_string()))?;

        info!("prompt requested for code review");
        Ok(GetPromptResult {
            description: None,
            messages: vec![PromptMessage {
                role: PromptRole::User,
                content: ToolContent::text(review_prompt(&args.code)),
            }],
        })
    }
}

/// Text of the `example_prompt` template.
pub fn review_prompt(code: &str) -> String {
    format!("Please review this code:\n\n{code}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn tools() -> (TempDir, SqlTools) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TABLE genres (GenreId INTEGER PRIMARY KEY, Name TEXT);
                 INSERT INTO genres (Name) VALUES ('Rock'), ('Jazz'), ('Metal');",
            )
            .unwrap();
        (dir, SqlTools::new(Database::new(path)))
    }

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn advertises_four_tools_in_order() {
        let (_dir, tools) = tools();
        let names: Vec<String> = tools.tools().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![QUERY_DATA, PREVIEW_TABLE, COLUMN_SUMMARY, SCHEMA_DISCOVERY]
        );
    }

    #[tokio::test]
    async fn preview_defaults_to_five_rows() {
        let (_dir, tools) = tools();
        let result = tools
            .call_tool(PREVIEW_TABLE, args(json!({ "table_name": "genres" })))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.first_text().unwrap().lines().count(), 4);

        let limited = tools
            .call_tool(PREVIEW_TABLE, args(json!({ "table_name": "genres", "limit": 2 })))
            .await;
        assert_eq!(limited.first_text().unwrap().lines().count(), 3);
    }

    #[tokio::test]
    async fn database_errors_become_text() {
        let (_dir, tools) = tools();
        let result = tools
            .call_tool(QUERY_DATA, args(json!({ "sql": "SELEC nonsense" })))
            .await;
        assert!(result.is_error);
        assert!(result.first_text().unwrap().starts_with("Error: "));

        let missing = tools
            .call_tool(PREVIEW_TABLE, args(json!({ "table_name": "albums" })))
            .await;
        assert_eq!(missing.first_text(), Some("Error: no such table: albums"));
    }

    #[tokio::test]
    async fn bad_arguments_and_unknown_tools() {
        let (_dir, tools) = tools();
        let result = tools.call_tool(QUERY_DATA, Map::new()).await;
        assert!(result.is_error);
        assert!(
            result
                .first_text()
                .unwrap()
                .starts_with("Error: invalid arguments for query_data:")
        );

        let unknown = tools.call_tool("drop_everything", Map::new()).await;
        assert_eq!(unknown.first_text(), Some("Error: unknown tool: drop_everything"));
    }

    #[tokio::test]
    async fn schema_discovery_takes_no_arguments() {
        let (_dir, tools) = tools();
        let result = tools.call_tool(SCHEMA_DISCOVERY, Map::new()).await;
        assert_eq!(
            result.first_text(),
            Some("Table: genres\n  - GenreId (INTEGER)\n  - Name (TEXT)")
        );
    }

    #[tokio::test]
    async fn example_prompt_wraps_code() {
        let (_dir, tools) = tools();
        let rendered = tools
            .get_prompt(EXAMPLE_PROMPT, args(json!({ "code": "SELECT 1;" })))
            .await
            .unwrap();
        assert_eq!(
            rendered.messages[0].content.as_text(),
            Some("Please review this code:\n\nSELECT 1;")
        );

        let err = tools.get_prompt("other", Map::new()).await.unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
    }
}
