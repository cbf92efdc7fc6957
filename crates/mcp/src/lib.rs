//! MCP (Model Context Protocol) client library.
//!
//! This crate provides a client for communicating with an MCP server over
//! its stdin/stdout.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{Server, ServerConfig};
//!
//! # async fn example() -> mcp::Result<()> {
//! let config = ServerConfig::new("uv", ["run", "research_server.py"]);
//! let server = Server::connect(config).await?;
//!
//! for tool in server.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let mut args = serde_json::Map::new();
//! args.insert("paper_id".into(), "2401.00001".into());
//! let result = server.call_tool("extract_info", args).await?;
//! println!("{}", result.text());
//!
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod protocol;
mod server;

pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, EmbeddedResource, Implementation, InitializeParams,
    InitializeResult, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    ListToolsResult, PROTOCOL_VERSION, RequestId, ServerCapabilities, Tool, ToolContent,
};
pub use server::{DEFAULT_TIMEOUT, MAX_OUTPUT_SIZE, Server, ServerConfig};
