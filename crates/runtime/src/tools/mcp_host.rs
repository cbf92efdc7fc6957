//! MCP-backed tool host.

use super::{ToolError, ToolHost};
use mcp::{Server, ServerConfig, Tool};
use serde_json::{Map, Value};

/// Tool host backed by one MCP server process.
pub struct McpToolHost {
    server: Server,
    descriptors: Vec<Tool>,
}

impl McpToolHost {
    /// Spawn the server, complete the handshake, and cache its tool list.
    pub async fn connect(config: ServerConfig) -> mcp::Result<Self> {
        let server = Server::connect(config).await?;
        let descriptors = server.list_tools().await?;
        tracing::info!(
            server = server.name(),
            tools = descriptors.len(),
            "discovered MCP tools"
        );
        Ok(Self {
            server,
            descriptors,
        })
    }

    /// Name the server reported during the handshake.
    pub fn server_name(&self) -> &str {
        self.server.name()
    }

    /// Terminate the server process.
    pub async fn shutdown(self) {
        self.server.shutdown().await;
    }
}

impl ToolHost for McpToolHost {
    fn descriptors(&self) -> &[Tool] {
        &self.descriptors
    }

    async fn execute(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let result = self.server.call_tool(name, arguments).await?;

        serde_json::to_value(&result.content)
            .map_err(|e| ToolError::InvalidOutput(format!("serialize result: {e}")))
    }
}
