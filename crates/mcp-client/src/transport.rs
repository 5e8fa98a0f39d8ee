//! MCP transport layer.
//!
//! - **Stdio**: spawn a child process, exchange newline-delimited JSON-RPC
//!   over stdin/stdout.
//! - **Sse**: subscribe to an HTTP event stream; the server's `endpoint`
//!   event names the companion POST URL for requests, and responses come
//!   back as `message` events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{oneshot, Mutex};

use crate::config::McpServerConfig;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Per-request response deadline on either transport.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
/// How long the SSE handshake may wait for the `endpoint` event.
const ENDPOINT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
/// Non-JSON stdout lines tolerated before declaring the server broken.
const MAX_SKIP_LINES: usize = 1000;

/// Trait for MCP server transports.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the matching response.
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError>;

    /// Send a JSON-RPC notification (no response expected).
    async fn send_notification(&self, method: &str) -> Result<(), TransportError>;

    /// Whether the transport is still usable.
    fn is_alive(&self) -> bool;

    /// Shut down gracefully, ignoring close errors.
    async fn shutdown(&self);
}

/// Errors surfaced by transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("MCP server connection closed")]
    Closed,

    #[error("timeout waiting for response")]
    Timeout,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stdio transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stdio transport: one JSON-RPC message per newline-delimited line.
///
/// `request_lock` serializes entire request/response cycles so concurrent
/// callers cannot read each other's responses.
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
    request_lock: Mutex<()>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl StdioTransport {
    /// Spawn the configured command with piped stdio.
    pub fn spawn(config: &McpServerConfig) -> Result<Self, TransportError> {
        let command = config.command.as_deref().unwrap_or_default();
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(TransportError::Io)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            ))
        })?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            request_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    async fn write_line(&self, json: &str) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Read the next JSON line, skipping blank lines and stray logging.
    async fn read_line(&self) -> Result<String, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut stdout = self.stdout.lock().await;
        let mut skipped = 0usize;
        loop {
            let mut line = String::new();
            let bytes_read = stdout.read_line(&mut line).await?;
            if bytes_read == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Closed);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('{') {
                return Ok(trimmed.to_string());
            }
            skipped += 1;
            if skipped >= MAX_SKIP_LINES {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "MCP server flooded stdout with non-JSON output",
                )));
            }
            tracing::debug!(line = %trimmed, "skipping non-JSON line from MCP server stdout");
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let _guard = self.request_lock.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_string(&req)?;

        tracing::debug!(id, method, "sending MCP request");
        self.write_line(&json).await?;

        // Servers may interleave notifications; read until our id shows up.
        let result = tokio::time::timeout(REQUEST_TIMEOUT, async {
            loop {
                let line = self.read_line().await?;
                if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&line) {
                    if resp.id == id {
                        return Ok(resp);
                    }
                }
                tracing::debug!(line = %line, "skipping non-matching message from MCP server");
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        let json = serde_json::to_string(&JsonRpcNotification::new(method))?;
        tracing::debug!(method, "sending MCP notification");
        self.write_line(&json).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "error closing MCP server stdin");
            }
        }
        match tokio::time::timeout(std::time::Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(?status, "MCP server process exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "error waiting for MCP server process"),
            Err(_) => {
                tracing::warn!("MCP server did not exit in time, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill MCP server process");
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One parsed SSE event (name defaults to "message").
#[derive(Debug, PartialEq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Drain complete events from an SSE buffer, leaving any partial tail.
pub(crate) fn drain_events(buffer: &mut String) -> Vec<SseEvent> {
    let mut events = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        let mut event = String::from("message");
        let mut data_lines: Vec<String> = Vec::new();
        for line in block.lines() {
            let line = line.trim_end();
            if let Some(name) = line.strip_prefix("event:") {
                event = name.trim().to_string();
            } else if let Some(data) = line.strip_prefix("data:") {
                data_lines.push(data.trim().to_string());
            }
        }
        if !data_lines.is_empty() {
            events.push(SseEvent { event, data: data_lines.join("\n") });
        }
    }

    events
}

type PendingMap = Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// SSE transport: a one-way event stream plus a POST companion channel.
pub struct SseTransport {
    client: reqwest::Client,
    post_url: String,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    reader: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SseTransport {
    /// Open the event stream and wait for the server to announce its
    /// request endpoint.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::new();
        let response = client
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "event stream returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let pending: PendingMap = Arc::new(parking_lot::Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let reader = tokio::spawn(Self::read_loop(
            response,
            url.to_string(),
            pending.clone(),
            alive.clone(),
            endpoint_tx,
        ));

        let post_url = match tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx).await {
            Ok(Ok(url)) => url,
            Ok(Err(_)) | Err(_) => {
                reader.abort();
                alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Http(
                    "server never announced a request endpoint".into(),
                ));
            }
        };

        tracing::debug!(post_url = %post_url, "SSE transport connected");

        Ok(Self {
            client,
            post_url,
            pending,
            next_id: AtomicU64::new(1),
            alive,
            reader: parking_lot::Mutex::new(Some(reader)),
        })
    }

    /// Consume the event stream: the first `endpoint` event names the POST
    /// URL, subsequent `message` events are JSON-RPC responses routed to
    /// their waiting callers.
    async fn read_loop(
        mut response: reqwest::Response,
        stream_url: String,
        pending: PendingMap,
        alive: Arc<AtomicBool>,
        endpoint_tx: oneshot::Sender<String>,
    ) {
        let mut endpoint_tx = Some(endpoint_tx);
        let mut buffer = String::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for event in drain_events(&mut buffer) {
                        match event.event.as_str() {
                            "endpoint" => {
                                if let Some(tx) = endpoint_tx.take() {
                                    let url = resolve_endpoint(&stream_url, &event.data);
                                    let _ = tx.send(url);
                                }
                            }
                            "message" => {
                                match serde_json::from_str::<JsonRpcResponse>(&event.data) {
                                    Ok(resp) => {
                                        if let Some(tx) = pending.lock().remove(&resp.id) {
                                            let _ = tx.send(resp);
                                        }
                                    }
                                    Err(e) => {
                                        tracing::debug!(
                                            error = %e,
                                            "ignoring non-response message event"
                                        );
                                    }
                                }
                            }
                            other => {
                                tracing::debug!(event = %other, "ignoring SSE event");
                            }
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "SSE stream read failed");
                    break;
                }
            }
        }

        alive.store(false, Ordering::SeqCst);
        // Dropping the senders wakes all waiters with a Closed error.
        pending.lock().clear();
        tracing::debug!("SSE event stream closed");
    }

    async fn post_message(&self, body: &Value) -> Result<Option<JsonRpcResponse>, TransportError> {
        let resp = self
            .client
            .post(&self.post_url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Http(format!(
                "request endpoint returned HTTP {}",
                status.as_u16()
            )));
        }

        // Some servers answer inline; most return 202 and reply on the stream.
        let text = resp.text().await.unwrap_or_default();
        Ok(serde_json::from_str::<JsonRpcResponse>(&text).ok())
    }
}

fn resolve_endpoint(stream_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    // Resolve a path against the stream URL's origin.
    match stream_url.find("://").map(|i| i + 3) {
        Some(host_start) => {
            let origin_end = stream_url[host_start..]
                .find('/')
                .map(|i| host_start + i)
                .unwrap_or(stream_url.len());
            format!("{}{}", &stream_url[..origin_end], endpoint)
        }
        None => endpoint.to_string(),
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        let body = serde_json::to_value(&req)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        tracing::debug!(id, method, "sending MCP request over SSE companion channel");
        match self.post_message(&body).await {
            Ok(Some(resp)) if resp.id == id => {
                self.pending.lock().remove(&id);
                return Ok(resp);
            }
            Ok(_) => {}
            Err(e) => {
                self.pending.lock().remove(&id);
                return Err(e);
            }
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let body = serde_json::to_value(JsonRpcNotification::new(method))?;
        self.post_message(&body).await.map(|_| ())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.pending.lock().clear();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_named_event_with_data() {
        let mut buf = String::from("event: endpoint\ndata: /messages?session=1\n\n");
        let events = drain_events(&mut buf);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[0].data, "/messages?session=1");
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_defaults_event_name_to_message() {
        let mut buf = String::from("data: {\"id\":1}\n\n");
        let events = drain_events(&mut buf);
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn drain_keeps_partial_tail() {
        let mut buf = String::from("event: message\ndata: {\"id\":1}\n\nevent: mess");
        let events = drain_events(&mut buf);
        assert_eq!(events.len(), 1);
        assert_eq!(buf, "event: mess");
    }

    #[test]
    fn drain_joins_multi_line_data() {
        let mut buf = String::from("data: line1\ndata: line2\n\n");
        let events = drain_events(&mut buf);
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn resolve_endpoint_handles_absolute_and_relative() {
        assert_eq!(
            resolve_endpoint("http://localhost:3000/sse", "/messages"),
            "http://localhost:3000/messages"
        );
        assert_eq!(
            resolve_endpoint("http://localhost:3000/sse", "http://other:9/x"),
            "http://other:9/x"
        );
        assert_eq!(resolve_endpoint("http://localhost:3000", "/m"), "http://localhost:3000/m");
    }

    #[tokio::test]
    async fn spawn_failure_for_missing_binary() {
        let config = McpServerConfig {
            name: "ghost".into(),
            transport: crate::config::McpTransportKind::Stdio,
            command: Some("definitely-not-a-real-binary-xyz".into()),
            args: Vec::new(),
            env: HashMap::new(),
            url: None,
            enabled: true,
        };
        assert!(StdioTransport::spawn(&config).is_err());
    }
}
