//! MCP error types.

use std::time::Duration;

use crate::protocol::JsonRpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn server '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("handshake with server '{command}' failed: {reason}")]
    Handshake { command: String, reason: String },

    #[error("server exited unexpectedly")]
    ServerExited,

    #[error("timeout waiting for {method} response after {after:?}")]
    Timeout { method: String, after: Duration },

    #[error("pipe error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode or decode message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("tool call failed: {0}")]
    ToolCallFailed(String),

    #[error("output too large: {size} bytes (max {max})")]
    OutputTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
