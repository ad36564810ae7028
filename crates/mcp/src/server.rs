//! Provider process management (spawn, request/response, shutdown).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, IncomingMessage, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, ListToolsParams, ListToolsResult, RequestId, Tool,
};

/// Default timeout for a single request/response exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum size of one line read from a provider (4MB).
pub const MAX_OUTPUT_SIZE: usize = 4 * 1024 * 1024;

/// Upper bound on `tools/list` pages, guards against cursor loops.
const MAX_TOOL_PAGES: usize = 64;

const CLIENT_NAME: &str = "society";

/// Launch parameters for a stdio tool provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

struct ServerIo {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Handle to a running provider process speaking JSON-RPC over stdio.
pub struct Server {
    config: ServerConfig,
    process: Mutex<Child>,
    // `None` once shut down; the lock also serializes request/response pairs.
    io: Mutex<Option<ServerIo>>,
    next_id: AtomicI64,
    initialized: AtomicBool,
    info: OnceLock<InitializeResult>,
    request_timeout: Duration,
}

impl Server {
    /// Spawn the provider process. Its stderr is forwarded to `tracing`.
    pub async fn spawn(config: ServerConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut process = cmd.spawn().map_err(Error::Spawn)?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdin")))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdout")))?;

        if let Some(stderr) = process.stderr.take() {
            let name = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "mcp::stderr", provider = %name, "{line}");
                }
            });
        }

        debug!(provider = %config.name, command = %config.command, "spawned provider");

        Ok(Self {
            config,
            process: Mutex::new(process),
            io: Mutex::new(Some(ServerIo {
                stdin,
                stdout: BufReader::new(stdout),
            })),
            next_id: AtomicI64::new(1),
            initialized: AtomicBool::new(false),
            info: OnceLock::new(),
            request_timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Override the per-request timeout.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Perform the `initialize` handshake. Calling it twice is a no-op.
    pub async fn initialize(&self) -> Result<&InitializeResult> {
        if let Some(info) = self.info.get() {
            return Ok(info);
        }

        let params = serde_json::to_value(InitializeParams::new(CLIENT_NAME))?;
        let result: InitializeResult = self.request("initialize", Some(params)).await?;
        self.notify(JsonRpcNotification::new("notifications/initialized"))
            .await?;

        debug!(
            provider = %self.config.name,
            protocol = %result.protocol_version,
            "provider initialized"
        );

        self.initialized.store(true, Ordering::SeqCst);
        Ok(self.info.get_or_init(|| result))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Fetch every tool the provider exposes, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.ensure_initialized()?;

        let mut tools = Vec::new();
        let mut cursor = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = serde_json::to_value(ListToolsParams {
                cursor: cursor.take(),
            })?;
            let page: ListToolsResult = self.request("tools/list", Some(params)).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        Err(Error::InvalidResponse(format!(
            "tools/list did not terminate after {MAX_TOOL_PAGES} pages"
        )))
    }

    /// Call a tool. A result with `is_error` set is returned as-is; the
    /// caller decides how to surface it.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.ensure_initialized()?;

        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        self.request("tools/call", Some(params)).await
    }

    /// Close stdin, give the process `grace` to exit, then kill it.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        let Some(io) = self.io.lock().await.take() else {
            return Ok(());
        };
        // Dropping stdin signals EOF, which is the stdio transport's close.
        drop(io);

        let mut process = self.process.lock().await;
        match timeout(grace, process.wait()).await {
            Ok(Ok(status)) => {
                debug!(provider = %self.config.name, %status, "provider exited");
            }
            Ok(Err(e)) => return Err(Error::Io(e)),
            Err(_) => {
                debug!(provider = %self.config.name, "provider ignored EOF, killing");
                process.kill().await?;
            }
        }
        Ok(())
    }

    // --- Internal methods ---

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn request<R>(&self, method: &str, params: Option<Value>) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_request_id();
        let line = serde_json::to_string(&JsonRpcRequest::new(id.clone(), method, params))?;

        let mut guard = self.io.lock().await;
        let io = guard.as_mut().ok_or(Error::Closed)?;
        write_line(&mut io.stdin, &line).await?;

        let response = timeout(self.request_timeout, read_response(&mut io.stdout, &id))
            .await
            .map_err(|_| Error::Timeout {
                method: method.to_string(),
            })??;

        Ok(serde_json::from_value(response.into_result()?)?)
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        let line = serde_json::to_string(&notification)?;
        let mut guard = self.io.lock().await;
        let io = guard.as_mut().ok_or(Error::Closed)?;
        write_line(&mut io.stdin, &line).await
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

/// Read lines until the response for `expected` arrives, skipping
/// notifications, server-initiated requests and non-JSON noise.
async fn read_response(
    stdout: &mut BufReader<ChildStdout>,
    expected: &RequestId,
) -> Result<IncomingMessage> {
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

        let message: IncomingMessage = match serde_json::from_str(trimmed) {
            Ok(message) => message,
            Err(_) => {
                debug!(line = %trimmed, "skipping non-JSON provider output");
                continue;
            }
        };

        if !message.is_response() {
            debug!(method = ?message.method, "skipping provider notification");
            continue;
        }
        if message.id.as_ref() != Some(expected) {
            debug!(id = ?message.id, %expected, "skipping stale response");
            continue;
        }
        return Ok(message);
    }
}
