//! Chat runtime: model backends, MCP tool integration, and the dialogue.
//!
//! # Overview
//!
//! - **Session**: the conversation transcript plus the per-query cycle that
//!   sends user text to the model and runs at most one requested tool.
//! - **Backend**: a trait abstracting LLM providers (Gemini).
//! - **ToolHost**: a trait over the tool server; [`McpToolHost`] talks to an
//!   MCP server process.
//! - **build_endpoint_schema**: turns MCP tool descriptors into model tool
//!   declarations.
//!
//! # Example
//!
//! ```ignore
//! use mcp::ServerConfig;
//! use runtime::{GeminiBackend, McpToolHost, Session, ToolHost, build_endpoint_schema};
//!
//! # async fn example() -> runtime::Result<()> {
//! let host = McpToolHost::connect(ServerConfig::new("uv", ["run", "research_server.py"])).await?;
//! let declarations = build_endpoint_schema(host.descriptors()).unwrap_or_default();
//! let backend = GeminiBackend::builder("AIza...", "gemini-2.5-flash").build();
//!
//! let mut session = Session::new(backend, host, declarations);
//! session.process_query("Find papers on diffusion models", &mut std::io::stdout()).await?;
//! session.into_tool_host().shutdown().await;
//! # Ok(())
//! # }
//! ```

mod error;
pub mod model;
mod providers;
mod session;
pub mod tools;

pub use error::{Error, Result};

pub use model::{
    Backend, Message, ModelError, ModelRequest, ModelResponse, Part, Role, ToolCall, ToolOutcome,
    ToolResult, ToolSpec, Usage,
};

pub use providers::{DEFAULT_BASE_URL, DEFAULT_MODEL, GeminiBackend, GeminiBackendBuilder};

pub use tools::{McpToolHost, SchemaError, ToolError, ToolHost, build_endpoint_schema};

pub use session::{DialogueState, QueryOutcome, Session, TOOL_COMPLETED_NOTICE};
