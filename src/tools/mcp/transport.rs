//! Transports carrying JSON-RPC messages to a provider

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::Result;

use super::types::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest};

const SESSION_HEADER: &str = "Mcp-Session-Id";
const PROTOCOL_HEADER: &str = "MCP-Protocol-Version";

/// Message exchange with one provider
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Bring the transport up (spawn, dial, ...)
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    /// Send a request and wait for its response
    async fn request(&self, request: &JsonRpcRequest) -> Result<JsonRpcMessage>;

    /// Send a notification
    async fn notify(&self, notification: &JsonRpcNotification) -> Result<()>;

    /// Tear the transport down
    async fn close(&self) -> Result<()>;
}

struct LineIo<R, W> {
    reader: BufReader<R>,
    writer: W,
    /// Set while an exchange is on the wire. Still set when the next one
    /// starts means the last was dropped part way and the stream is out of step.
    in_flight: bool,
}

impl<R, W> LineIo<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn begin(&mut self) -> Result<()> {
        if self.in_flight {
            return Err(Error::Tool(
                "stream is unusable after an interrupted exchange".to_string(),
            ));
        }
        self.in_flight = true;
        Ok(())
    }

    async fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.writer.write_all(line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_answer(&mut self, id: u64) -> Result<JsonRpcMessage> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "provider closed its output stream",
                )));
            }

            let text = line.trim();
            if text.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcMessage>(text) {
                Ok(message) if message.answers(id) => return Ok(message),
                Ok(message) => debug!("Skipping unrelated message: {:?}", message.method),
                Err(e) => debug!("Skipping non JSON-RPC line: {}", e),
            }
        }
    }
}

/// Newline-delimited JSON over a reader/writer pair.
///
/// One exchange at a time; messages that do not answer the pending request
/// (server notifications, late replies to cancelled requests) are skipped.
/// An exchange abandoned mid-way (a timeout dropping the future) leaves the
/// channel broken, and every later call fails at once.
pub struct LineChannel<R, W> {
    io: Mutex<LineIo<R, W>>,
}

impl<R, W> LineChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new(LineIo {
                reader: BufReader::new(reader),
                writer,
                in_flight: false,
            }),
        }
    }

    fn encode(payload: &impl Serialize) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(payload)?;
        line.push(b'\n');
        Ok(line)
    }

    pub async fn request(&self, request: &JsonRpcRequest) -> Result<JsonRpcMessage> {
        let line = Self::encode(request)?;
        let mut io = self.io.lock().await;
        io.begin()?;

        io.write_line(&line).await?;
        let message = io.read_answer(request.id).await?;

        io.in_flight = false;
        Ok(message)
    }

    pub async fn notify(&self, notification: &JsonRpcNotification) -> Result<()> {
        let line = Self::encode(notification)?;
        let mut io = self.io.lock().await;
        io.begin()?;

        io.write_line(&line).await?;

        io.in_flight = false;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        let mut io = self.io.lock().await;
        io.writer.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl<R, W> McpTransport for LineChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn request(&self, request: &JsonRpcRequest) -> Result<JsonRpcMessage> {
        LineChannel::request(self, request).await
    }

    async fn notify(&self, notification: &JsonRpcNotification) -> Result<()> {
        LineChannel::notify(self, notification).await
    }

    async fn close(&self) -> Result<()> {
        self.shutdown().await
    }
}

struct StdioProcess {
    child: Child,
    channel: LineChannel<ChildStdout, ChildStdin>,
}

/// Provider launched as a local subprocess
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    process: Mutex<Option<StdioProcess>>,
}

impl StdioTransport {
    pub fn new(command: &str, args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self {
            command: command.to_string(),
            args,
            env,
            process: Mutex::new(None),
        }
    }

    fn not_running(&self) -> Error {
        Error::Tool(format!("'{}' is not running", self.command))
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn open(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        if process.is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Tool(format!("Failed to launch '{}': {}", self.command, e)))?;

        let stdin = child.stdin.take().ok_or_else(|| self.not_running())?;
        let stdout = child.stdout.take().ok_or_else(|| self.not_running())?;

        debug!("Launched {} (pid {:?})", self.command, child.id());
        *process = Some(StdioProcess {
            child,
            channel: LineChannel::new(stdout, stdin),
        });
        Ok(())
    }

    async fn request(&self, request: &JsonRpcRequest) -> Result<JsonRpcMessage> {
        let process = self.process.lock().await;
        let process = process.as_ref().ok_or_else(|| self.not_running())?;
        process.channel.request(request).await
    }

    async fn notify(&self, notification: &JsonRpcNotification) -> Result<()> {
        let process = self.process.lock().await;
        let process = process.as_ref().ok_or_else(|| self.not_running())?;
        process.channel.notify(notification).await
    }

    async fn close(&self) -> Result<()> {
        let Some(mut process) = self.process.lock().await.take() else {
            return Ok(());
        };

        if let Err(e) = process.channel.shutdown().await {
            debug!("Closing stdin of {}: {}", self.command, e);
        }
        if let Err(e) = process.child.kill().await {
            debug!("Killing {}: {}", self.command, e);
        }
        Ok(())
    }
}

/// Session state handed out by an HTTP provider.
///
/// Owned by exactly one transport, so it lives as long as one connection.
#[derive(Debug, Clone, Default)]
pub struct McpSession {
    pub id: Option<String>,
    pub protocol_version: Option<String>,
}

/// Provider reached over HTTP POST
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    session: Mutex<McpSession>,
}

impl HttpTransport {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::Config(format!("invalid url {url}: {e}")))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url,
            session: Mutex::new(McpSession::default()),
        })
    }

    pub async fn session(&self) -> McpSession {
        self.session.lock().await.clone()
    }

    async fn post(&self, body: &impl Serialize) -> Result<reqwest::Response> {
        let session = self.session().await;

        let mut request = self
            .client
            .post(self.url.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(id) = &session.id {
            request = request.header(SESSION_HEADER, id);
        }
        if let Some(version) = &session.protocol_version {
            request = request.header(PROTOCOL_HEADER, version);
        }

        let response = request.send().await?;

        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session.lock().await.id = Some(id.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Tool(format!("HTTP {}: {}", status, text)));
        }

        Ok(response)
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, request: &JsonRpcRequest) -> Result<JsonRpcMessage> {
        let response = self.post(request).await?;
        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        let body = response.text().await?;

        let message = if is_stream {
            find_in_event_stream(&body, request.id)
                .ok_or_else(|| Error::Tool(format!("no response to {} in event stream", request.method)))?
        } else {
            let message: JsonRpcMessage = serde_json::from_str(&body)?;
            if !message.answers(request.id) {
                return Err(Error::Tool(format!("unexpected response to {}", request.method)));
            }
            message
        };

        if request.method == "initialize" {
            let version = message
                .result
                .as_ref()
                .and_then(|r| r.get("protocolVersion"))
                .and_then(|v| v.as_str());
            if let Some(version) = version {
                self.session.lock().await.protocol_version = Some(version.to_string());
            }
        }

        Ok(message)
    }

    async fn notify(&self, notification: &JsonRpcNotification) -> Result<()> {
        self.post(notification).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let session = std::mem::take(&mut *self.session.lock().await);
        let Some(id) = session.id else {
            return Ok(());
        };

        let result = self
            .client
            .delete(self.url.clone())
            .header(SESSION_HEADER, &id)
            .send()
            .await;
        if let Err(e) = result {
            debug!("Releasing session {} at {}: {}", id, self.url, e);
        }
        Ok(())
    }
}

/// Pick the response to `id` out of a `text/event-stream` body.
fn find_in_event_stream(body: &str, id: u64) -> Option<JsonRpcMessage> {
    let mut data = String::new();

    for line in body.lines().chain(std::iter::once("")) {
        if let Some(chunk) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(chunk.trim_start());
            continue;
        }

        if line.trim().is_empty() && !data.is_empty() {
            if let Ok(message) = serde_json::from_str::<JsonRpcMessage>(&data) {
                if message.answers(id) {
                    return Some(message);
                }
            }
            data.clear();
        }
    }

    None
}
