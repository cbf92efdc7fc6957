//! Tool execution and MCP integration.

pub mod errors;
mod host;
mod mcp_host;
pub mod schema;

pub use errors::ToolError;
pub use host::ToolHost;
pub use mcp_host::McpToolHost;
pub use schema::{SchemaError, build_endpoint_schema};
