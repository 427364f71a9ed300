use thiserror::Error;

/// Errors that can occur while listing or invoking tools.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("tool host: {0}")]
    Mcp(#[from] mcp::Error),
}
