//! MCP-backed tool host.

use super::{ToolError, ToolHost};
use crate::model::ToolSpec;
use serde_json::{Map, Value};
use tracing::{debug, info};

impl From<mcp::Tool> for ToolSpec {
    fn from(tool: mcp::Tool) -> Self {
        Self {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            schema: tool.input_schema,
        }
    }
}

/// Tool host backed by a remote MCP server.
pub struct McpToolHost {
    client: mcp::Client,
}

impl McpToolHost {
    pub fn new(client: mcp::Client) -> Self {
        Self { client }
    }

    /// Connect to the server at `endpoint` and complete the handshake.
    pub async fn connect(endpoint: impl Into<String>) -> Result<Self, ToolError> {
        let client = mcp::Client::connect(endpoint).await?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &mcp::Client {
        &self.client
    }

    /// End the MCP session.
    pub async fn close(&self) -> Result<(), ToolError> {
        self.client.close().await?;
        Ok(())
    }
}

impl ToolHost for McpToolHost {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        let tools = self.client.list_tools().await?;
        info!(
            count = tools.len(),
            tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "available tools"
        );
        Ok(tools.into_iter().map(ToolSpec::from).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<String, ToolError> {
        let result = self.client.call_tool(name, Some(arguments)).await?;
        if result.is_error {
            debug!(tool = name, "tool reported an error result");
        }
        Ok(result.first_text().unwrap_or_default().to_string())
    }
}
