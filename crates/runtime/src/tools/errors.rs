use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during tool execution.
///
/// These never end a session; the dialogue folds them into the
/// conversation as an error result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum ToolError {
    #[error("tool not available: {0}")]
    NotAvailable(String),
    /// The server ran the tool and reported a failure.
    #[error("{0}")]
    Remote(String),
    #[error("timeout after {0}ms")]
    Timeout(u64),
    #[error("transport: {0}")]
    Transport(String),
    #[error("invalid output: {0}")]
    InvalidOutput(String),
}

impl From<mcp::Error> for ToolError {
    fn from(err: mcp::Error) -> Self {
        match err {
            mcp::Error::ToolCallFailed(message) => Self::Remote(message),
            mcp::Error::JsonRpc(e) => Self::Remote(e.message),
            mcp::Error::Timeout { after, .. } => {
                Self::Timeout(u64::try_from(after.as_millis()).unwrap_or(u64::MAX))
            }
            other => Self::Transport(other.to_string()),
        }
    }
}
