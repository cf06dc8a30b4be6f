//! MCP (Model Context Protocol) session client
//!
//! Speaks JSON-RPC 2.0 to external tool servers over two transports:
//! stdio (a spawned child process with line-delimited framing) and
//! streamable HTTP (POST requests, with `data:`-line SSE bodies and
//! `Mcp-Session-Id` propagation). Sessions are opened per call by the `mcp`
//! step and handed to LLM clients as rendered [`McpServerSpec`] values.

use std::process::Stdio;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// MCP protocol version spoken by this client.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Stdio transport: spawn a server process and talk over its pipes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StdioServerSpec {
    /// Command to spawn
    pub command: String,
    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables for the child process
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// Working directory for the child process
    #[serde(default)]
    pub working_dir: Option<String>,
}

/// HTTP/SSE transport: POST JSON-RPC messages to a URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpServerSpec {
    /// Server endpoint
    pub url: String,
    /// Extra request headers
    #[serde(default)]
    pub headers: IndexMap<String, String>,
}

/// A rendered MCP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpServerSpec {
    /// Stdio child-process transport (selected when `command` is present)
    Stdio(StdioServerSpec),
    /// HTTP/SSE transport
    Http(HttpServerSpec),
}

impl McpServerSpec {
    /// Short descriptor for logs and error messages.
    pub fn descriptor(&self) -> String {
        match self {
            McpServerSpec::Stdio(spec) => spec.command.clone(),
            McpServerSpec::Http(spec) => spec.url.clone(),
        }
    }
}

/// Errors from MCP session management and tool calls.
#[derive(Debug, Error)]
pub enum McpClientError {
    /// The server process could not be spawned
    #[error("failed to spawn MCP server process: {0}")]
    Spawn(std::io::Error),
    /// The server closed the connection mid-exchange
    #[error("MCP server closed the connection")]
    ConnectionClosed,
    /// I/O failure on the transport
    #[error("I/O error talking to MCP server: {0}")]
    Io(#[from] std::io::Error),
    /// The server sent something that is not JSON
    #[error("invalid JSON from MCP server: {0}")]
    Json(#[from] serde_json::Error),
    /// HTTP transport failure
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a JSON-RPC error object
    #[error("MCP server returned error: {0}")]
    Server(Value),
    /// The response carried neither `result` nor `error`
    #[error("MCP response missing result")]
    MissingResult,
    /// The HTTP response body carried no `data:` line
    #[error("no data in SSE response from MCP server")]
    EmptySse,
}

enum Transport {
    Stdio {
        child: Child,
        stdin: BufWriter<ChildStdin>,
        stdout: BufReader<ChildStdout>,
    },
    Http {
        client: reqwest::Client,
        url: String,
        session_id: Option<String>,
    },
}

/// An initialized MCP session.
///
/// Acquire with [`McpSession::connect`], release with
/// [`McpSession::shutdown`] on all exit paths.
pub struct McpSession {
    transport: Transport,
    next_id: u64,
    descriptor: String,
}

impl McpSession {
    /// Open a session and run the initialize/initialized handshake.
    pub async fn connect(spec: &McpServerSpec) -> Result<Self, McpClientError> {
        let descriptor = spec.descriptor();
        let transport = match spec {
            McpServerSpec::Stdio(stdio) => {
                info!(command = %stdio.command, "connecting to MCP server over stdio");
                let mut command = Command::new(&stdio.command);
                command.args(&stdio.args);
                for (name, value) in &stdio.env {
                    command.env(name, value);
                }
                if let Some(dir) = &stdio.working_dir {
                    command.current_dir(dir);
                }
                let mut child = command
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(McpClientError::Spawn)?;

                let stdin = child.stdin.take().ok_or(McpClientError::ConnectionClosed)?;
                let stdout = child.stdout.take().ok_or(McpClientError::ConnectionClosed)?;

                Transport::Stdio {
                    child,
                    stdin: BufWriter::new(stdin),
                    stdout: BufReader::new(stdout),
                }
            }
            McpServerSpec::Http(http) => {
                info!(url = %http.url, "connecting to MCP server over HTTP");
                let mut headers = reqwest::header::HeaderMap::new();
                for (name, value) in &http.headers {
                    if let (Ok(name), Ok(value)) = (
                        reqwest::header::HeaderName::from_bytes(name.as_bytes()),
                        reqwest::header::HeaderValue::from_str(value),
                    ) {
                        headers.insert(name, value);
                    } else {
                        warn!(header = %name, "skipping invalid MCP header");
                    }
                }
                let client = reqwest::Client::builder().default_headers(headers).build()?;
                Transport::Http {
                    client,
                    url: http.url.clone(),
                    session_id: None,
                }
            }
        };

        let mut session = Self {
            transport,
            next_id: 1,
            descriptor,
        };
        session.initialize().await?;
        Ok(session)
    }

    async fn initialize(&mut self) -> Result<(), McpClientError> {
        let id = self.take_id();
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "clientInfo": {
                    "name": "recipe-executor",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }
        });

        let response = self.round_trip(&request).await?;
        if let Some(error) = response.get("error") {
            return Err(McpClientError::Server(error.clone()));
        }

        let notification = json!({ "jsonrpc": "2.0", "method": "initialized" });
        self.notify(&notification).await?;
        debug!(server = %self.descriptor, "MCP session initialized");
        Ok(())
    }

    /// Invoke a named tool and return the JSON-RPC `result` object.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: Value,
    ) -> Result<Value, McpClientError> {
        let id = self.take_id();
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        });

        info!(server = %self.descriptor, tool = name, "calling MCP tool");
        let response = self.round_trip(&request).await?;
        if let Some(error) = response.get("error") {
            return Err(McpClientError::Server(error.clone()));
        }
        response
            .get("result")
            .cloned()
            .ok_or(McpClientError::MissingResult)
    }

    /// Tear the session down, killing the child process for stdio servers.
    pub async fn shutdown(mut self) {
        if let Transport::Stdio { child, .. } = &mut self.transport {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn round_trip(&mut self, request: &Value) -> Result<Value, McpClientError> {
        match &mut self.transport {
            Transport::Stdio { stdin, stdout, .. } => {
                let line = format!("{request}\n");
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await?;

                let mut response_line = String::new();
                let bytes_read = stdout.read_line(&mut response_line).await?;
                if bytes_read == 0 {
                    return Err(McpClientError::ConnectionClosed);
                }
                Ok(serde_json::from_str(response_line.trim())?)
            }
            Transport::Http {
                client,
                url,
                session_id,
            } => {
                let mut builder = client
                    .post(url.as_str())
                    .header("Accept", "application/json, text/event-stream")
                    .header("Content-Type", "application/json");
                if let Some(session) = session_id.as_deref() {
                    builder = builder.header("Mcp-Session-Id", session);
                }

                let response = builder.json(request).send().await?;
                if let Some(header) = response.headers().get("Mcp-Session-Id") {
                    if let Ok(value) = header.to_str() {
                        *session_id = Some(value.to_string());
                    }
                }

                let content_type = response
                    .headers()
                    .get("Content-Type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("application/json")
                    .to_string();

                if content_type.contains("text/event-stream") {
                    let body = response.text().await?;
                    parse_sse_body(&body)
                } else {
                    Ok(response.json().await?)
                }
            }
        }
    }

    async fn notify(&mut self, notification: &Value) -> Result<(), McpClientError> {
        match &mut self.transport {
            Transport::Stdio { stdin, .. } => {
                let line = format!("{notification}\n");
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await?;
                Ok(())
            }
            Transport::Http {
                client,
                url,
                session_id,
            } => {
                let mut builder = client
                    .post(url.as_str())
                    .header("Accept", "application/json, text/event-stream")
                    .header("Content-Type", "application/json");
                if let Some(session) = session_id.as_deref() {
                    builder = builder.header("Mcp-Session-Id", session);
                }
                let response = builder.json(notification).send().await?;
                if response.status() != reqwest::StatusCode::ACCEPTED {
                    debug!(
                        status = %response.status(),
                        "MCP notification returned unexpected status"
                    );
                }
                Ok(())
            }
        }
    }
}

/// Extract the first `data:` line of an SSE body and parse it as JSON.
fn parse_sse_body(body: &str) -> Result<Value, McpClientError> {
    for line in body.lines() {
        if let Some(data) = line.strip_prefix("data: ") {
            return Ok(serde_json::from_str(data)?);
        }
    }
    Err(McpClientError::EmptySse)
}

/// Convert a tool result into a JSON mapping for context storage.
///
/// Objects pass through; anything else is wrapped as `{ "result": value }`.
pub fn result_to_mapping(result: Value) -> Value {
    match result {
        Value::Object(_) => result,
        other => json!({ "result": other }),
    }
}
