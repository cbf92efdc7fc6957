//! MCP server management (spawn, communicate, lifecycle).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, ListToolsResult, RequestId, Tool,
};

/// Default timeout for MCP operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum size of a single message line (1MB).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// How long a server gets to exit on its own after stdin closes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Configuration for an MCP server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Applies to the handshake and to every request.
    pub timeout: Duration,
}

impl ServerConfig {
    pub fn new(
        command: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// The pipe pair, locked as a unit so request/response pairs never interleave.
struct Channel {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Handle to a running, initialized MCP server.
///
/// The child process is killed when the handle is dropped; prefer
/// [`Server::shutdown`] for an orderly exit.
pub struct Server {
    config: ServerConfig,
    process: Mutex<Child>,
    channel: Mutex<Channel>,
    next_id: AtomicI64,
    info: InitializeResult,
}

impl Server {
    /// Spawn the server process and complete the MCP handshake.
    pub async fn connect(config: ServerConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut process = cmd.spawn().map_err(|source| Error::Spawn {
            command: config.command.clone(),
            source,
        })?;

        let stdin = process.stdin.take().ok_or_else(|| Error::Spawn {
            command: config.command.clone(),
            source: std::io::Error::other("failed to capture stdin"),
        })?;
        let stdout = process.stdout.take().ok_or_else(|| Error::Spawn {
            command: config.command.clone(),
            source: std::io::Error::other("failed to capture stdout"),
        })?;

        tracing::debug!(command = %config.command, args = ?config.args, "spawned MCP server");

        let channel = Mutex::new(Channel {
            stdin,
            stdout: BufReader::new(stdout),
        });
        let next_id = AtomicI64::new(1);

        let info = handshake(&channel, &next_id, config.timeout)
            .await
            .map_err(|e| Error::Handshake {
                command: config.command.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            server = %info.server_info.name,
            protocol = %info.protocol_version,
            "MCP session initialized"
        );

        Ok(Self {
            config,
            process: Mutex::new(process),
            channel,
            next_id,
            info,
        })
    }

    /// Name the server reported during the handshake.
    pub fn name(&self) -> &str {
        &self.info.server_info.name
    }

    /// Handshake result (protocol version, capabilities, server info).
    pub fn info(&self) -> &InitializeResult {
        &self.info
    }

    /// List the tools the server exposes, in server order.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let result: ListToolsResult = self.request("tools/list", None::<()>).await?;
        Ok(result.tools)
    }

    /// Call a tool by name.
    ///
    /// A result flagged `isError` is returned as [`Error::ToolCallFailed`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, Value>,
    ) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };

        let result: CallToolResult = self.request("tools/call", Some(params)).await?;

        if result.is_error {
            return Err(Error::ToolCallFailed(result.text()));
        }

        Ok(result)
    }

    /// Close the server's stdin, give it a moment to exit, then kill it.
    pub async fn shutdown(self) {
        let Self {
            process, channel, ..
        } = self;
        drop(channel);

        let mut process = process.into_inner();
        match timeout(SHUTDOWN_GRACE, process.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "MCP server exited"),
            Ok(Err(e)) => tracing::warn!("failed to wait for MCP server: {e}"),
            Err(_) => {
                tracing::debug!("MCP server did not exit in time, killing");
                if let Err(e) = process.kill().await {
                    tracing::warn!("failed to kill MCP server: {e}");
                }
            }
        }
    }

    // --- Internal methods ---

    fn next_request_id(&self) -> RequestId {
        next_request_id(&self.next_id)
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_request_id();
        let value = exchange(
            &self.channel,
            id,
            method,
            params.map(serde_json::to_value).transpose()?,
            self.config.timeout,
        )
        .await?;
        Ok(serde_json::from_value(value)?)
    }
}

fn next_request_id(counter: &AtomicI64) -> RequestId {
    RequestId::Number(counter.fetch_add(1, Ordering::SeqCst))
}

/// `initialize` request followed by the `notifications/initialized` notification.
async fn handshake(
    channel: &Mutex<Channel>,
    next_id: &AtomicI64,
    limit: Duration,
) -> Result<InitializeResult> {
    let params = serde_json::to_value(InitializeParams::default())?;
    let value = exchange(
        channel,
        next_request_id(next_id),
        "initialize",
        Some(params),
        limit,
    )
    .await?;
    let info: InitializeResult = serde_json::from_value(value)?;
    notify(channel, "notifications/initialized").await?;
    Ok(info)
}

async fn exchange(
    channel: &Mutex<Channel>,
    id: RequestId,
    method: &str,
    params: Option<Value>,
    limit: Duration,
) -> Result<Value> {
    let mut request = JsonRpcRequest::new(id.clone(), method);
    if let Some(p) = params {
        request = request.with_params(p);
    }

    let mut channel = channel.lock().await;
    write_line(&mut channel.stdin, &serde_json::to_string(&request)?).await?;
    tracing::debug!(?id, method, "sent MCP request");

    let response = timeout(limit, read_response(&mut channel.stdout, &id))
        .await
        .map_err(|_| Error::Timeout {
            method: method.to_string(),
            after: limit,
        })??;

    Ok(response.into_result()?)
}

async fn notify(channel: &Mutex<Channel>, method: &str) -> Result<()> {
    let notification = JsonRpcNotification::new(method);
    let mut channel = channel.lock().await;
    write_line(&mut channel.stdin, &serde_json::to_string(&notification)?).await
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

/// Read lines until the response to `id` arrives.
async fn read_response(
    stdout: &mut BufReader<ChildStdout>,
    id: &RequestId,
) -> Result<JsonRpcMessage> {
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = stdout.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Err(Error::ServerExited);
        }

        if line.len() > MAX_OUTPUT_SIZE {
            return Err(Error::OutputTooLarge {
                size: line.len(),
                max: MAX_OUTPUT_SIZE,
            });
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let message: JsonRpcMessage = match serde_json::from_str(trimmed) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("skipping unparseable MCP message: {e}");
                continue;
            }
        };

        if message.is_response_to(id) {
            return Ok(message);
        }

        match (&message.id, &message.method) {
            (_, Some(method)) => tracing::debug!(method, "ignoring server-initiated message"),
            (Some(other), None) => tracing::warn!(?other, "ignoring stale MCP response"),
            (None, None) => tracing::warn!("ignoring MCP message without id or method"),
        }
    }
}
