//! Tool host trait.

use crate::tools::ToolError;
use mcp::Tool;
use serde_json::{Map, Value};
use std::future::Future;

/// Trait for tool execution hosts.
///
/// This is the boundary between the dialogue and side effects.
pub trait ToolHost: Send + Sync {
    /// Tool descriptors as advertised by the server, in server order.
    fn descriptors(&self) -> &[Tool];

    /// Execute one tool call and return its content payload.
    fn execute(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> impl Future<Output = Result<Value, ToolError>> + Send;
}
