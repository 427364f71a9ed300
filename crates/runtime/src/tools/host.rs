//! Tool host trait.

use crate::model::ToolSpec;
use crate::tools::ToolError;
use serde_json::{Map, Value};
use std::future::Future;

/// Trait for tool execution hosts.
///
/// This is the boundary between the model loop and side effects. Tools are
/// listed fresh on every turn, so implementations should not assume their
/// list is cached by the caller.
pub trait ToolHost: Send + Sync {
    /// Get available tool specifications, in the host's order.
    fn list_tools(&self) -> impl Future<Output = Result<Vec<ToolSpec>, ToolError>> + Send;

    /// Invoke a tool and return its text output.
    ///
    /// Tool-level failures usually come back as `Ok` text starting with
    /// `Error:`; `Err` means the call itself could not be made.
    fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> impl Future<Output = Result<String, ToolError>> + Send;
}
