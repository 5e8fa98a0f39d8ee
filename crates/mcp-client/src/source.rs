//! The remote skill source: supervises one MCP server connection.
//!
//! Tools are advertised as `mcp-<server>.<tool>`; the prefix is stripped
//! before `tools/call`. Connection failures schedule reconnect attempts
//! with exponential backoff (5s doubling, capped at 60s) that continue
//! until the source is destroyed. While disconnected the source advertises
//! no tools and `execute` fails with `NotConnected`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use maestro_domain::error::{Error, Result};
use maestro_domain::tool::{ToolContext, ToolDefinition};
use maestro_skills::source::{SkillSource, SourceKind};

use crate::config::{McpServerConfig, McpTransportKind};
use crate::protocol::{self, ToolCallResult, ToolsListResult};
use crate::transport::{McpTransport, SseTransport, StdioTransport};

/// Base reconnect delay; attempt `n` waits `min(base × 2^(n−1), cap)`.
const BACKOFF_BASE_MS: u64 = 5_000;
const BACKOFF_CAP_MS: u64 = 60_000;

/// Delay before reconnect attempt `n` (1-based).
fn backoff_delay(attempt: u32) -> std::time::Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let ms = BACKOFF_BASE_MS.saturating_mul(1u64 << shift).min(BACKOFF_CAP_MS);
    std::time::Duration::from_millis(ms)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection supervision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    config: McpServerConfig,
    source_name: String,
    transport: tokio::sync::RwLock<Option<Arc<dyn McpTransport>>>,
    /// Prefixed descriptors cached at handshake time.
    tools: parking_lot::RwLock<Vec<ToolDefinition>>,
    attempts: AtomicU32,
    destroyed: AtomicBool,
    reconnect_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Inner {
    /// Establish the transport, perform the handshake, and cache tools.
    async fn connect(&self) -> Result<()> {
        let transport: Arc<dyn McpTransport> = match self.config.transport {
            McpTransportKind::Stdio => Arc::new(
                StdioTransport::spawn(&self.config)
                    .map_err(|e| Error::NotConnected(format!("{}: {e}", self.source_name)))?,
            ),
            McpTransportKind::Sse => {
                let url = self.config.url.as_deref().unwrap_or_default();
                Arc::new(
                    SseTransport::connect(url)
                        .await
                        .map_err(|e| Error::NotConnected(format!("{}: {e}", self.source_name)))?,
                )
            }
        };

        let tools = handshake(transport.as_ref(), &self.source_name).await?;

        *self.tools.write() = tools;
        *self.transport.write().await = Some(transport);
        self.attempts.store(0, Ordering::SeqCst);

        tracing::info!(
            source = %self.source_name,
            tool_count = self.tools.read().len(),
            "MCP server connected"
        );
        Ok(())
    }

}

/// Return the live transport, discarding a dead one (and kicking off a
/// reconnect) on the way.
async fn live_transport(inner: &Arc<Inner>) -> Option<Arc<dyn McpTransport>> {
    let transport = inner.transport.read().await.clone()?;
    if transport.is_alive() {
        return Some(transport);
    }

    tracing::warn!(source = %inner.source_name, "MCP transport lost");
    *inner.transport.write().await = None;
    inner.tools.write().clear();
    schedule_reconnect(inner.clone());
    None
}

/// `initialize` + `notifications/initialized` + `tools/list`, returning
/// the prefixed tool descriptors.
async fn handshake(
    transport: &dyn McpTransport,
    source_name: &str,
) -> Result<Vec<ToolDefinition>> {
    let params = serde_json::to_value(protocol::initialize_params())?;
    let resp = transport
        .send_request("initialize", Some(params))
        .await
        .map_err(|e| Error::NotConnected(format!("{source_name}: {e}")))?;
    resp.into_result()
        .map_err(|e| Error::NotConnected(format!("{source_name}: initialize failed: {e}")))?;

    transport
        .send_notification("notifications/initialized")
        .await
        .map_err(|e| Error::NotConnected(format!("{source_name}: {e}")))?;

    let tools_resp = transport
        .send_request("tools/list", None)
        .await
        .map_err(|e| Error::NotConnected(format!("{source_name}: {e}")))?;

    let tools = match tools_resp.into_result() {
        Ok(value) => match serde_json::from_value::<ToolsListResult>(value) {
            Ok(r) => r.tools,
            Err(e) => {
                tracing::warn!(source = %source_name, error = %e, "unparseable tools/list result");
                Vec::new()
            }
        },
        Err(e) => {
            tracing::warn!(source = %source_name, error = %e, "tools/list returned error");
            Vec::new()
        }
    };

    Ok(tools
        .into_iter()
        .map(|t| ToolDefinition {
            name: format!("{source_name}.{}", t.name),
            description: t.description,
            parameters: t.input_schema,
        })
        .collect())
}

/// Spawn the retry loop unless one is already running. The task holds the
/// source's `Inner` and dies on `destroy`; timers never outlive the source.
fn schedule_reconnect(inner: Arc<Inner>) {
    if inner.destroyed.load(Ordering::SeqCst) {
        return;
    }
    let mut guard = inner.reconnect_task.lock();
    if guard.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
        return;
    }

    let task_inner = inner.clone();
    *guard = Some(tokio::spawn(async move {
        loop {
            let attempt = task_inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = backoff_delay(attempt);
            tracing::info!(
                source = %task_inner.source_name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "scheduling MCP reconnect"
            );
            tokio::time::sleep(delay).await;

            if task_inner.destroyed.load(Ordering::SeqCst) {
                break;
            }
            match task_inner.connect().await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(
                        source = %task_inner.source_name,
                        attempt,
                        error = %e,
                        "MCP reconnect attempt failed"
                    );
                }
            }
        }
    }));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpSkillSource
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct McpSkillSource {
    inner: Arc<Inner>,
}

impl McpSkillSource {
    pub fn new(config: McpServerConfig) -> Self {
        let source_name = config.source_name();
        Self {
            inner: Arc::new(Inner {
                config,
                source_name,
                transport: tokio::sync::RwLock::new(None),
                tools: parking_lot::RwLock::new(Vec::new()),
                attempts: AtomicU32::new(0),
                destroyed: AtomicBool::new(false),
                reconnect_task: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Strip the `mcp-<name>.` prefix before forwarding to the server.
    fn server_tool_name<'a>(&self, tool_name: &'a str) -> &'a str {
        let prefix = format!("{}.", self.inner.source_name);
        tool_name.strip_prefix(&prefix).unwrap_or(tool_name)
    }
}

/// Join the text content blocks of a `tools/call` response: one block
/// yields its text, several join with newlines, none yields the raw JSON.
fn extract_text(result: &ToolCallResult) -> Value {
    let texts: Vec<&str> = result
        .content
        .iter()
        .filter(|c| c.content_type == "text")
        .map(|c| c.text.as_str())
        .collect();
    match texts.len() {
        0 => serde_json::to_value(result).unwrap_or(Value::Null),
        1 => Value::String(texts[0].to_string()),
        _ => Value::String(texts.join("\n")),
    }
}

#[async_trait]
impl SkillSource for McpSkillSource {
    fn name(&self) -> &str {
        &self.inner.source_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Remote
    }

    async fn initialize(&self) -> Result<()> {
        self.inner.config.validate()?;
        if !self.inner.config.enabled {
            return Err(Error::Config(format!(
                "mcp server {} is disabled",
                self.inner.config.name
            )));
        }

        match self.inner.connect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                schedule_reconnect(self.inner.clone());
                Err(e)
            }
        }
    }

    async fn tools(&self) -> Result<Vec<ToolDefinition>> {
        match live_transport(&self.inner).await {
            Some(_) => Ok(self.inner.tools.read().clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn execute(&self, tool_name: &str, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let transport = live_transport(&self.inner)
            .await
            .ok_or_else(|| Error::NotConnected(self.inner.source_name.clone()))?;

        let call_params = serde_json::json!({
            "name": self.server_tool_name(tool_name),
            "arguments": params,
        });

        let resp = transport
            .send_request("tools/call", Some(call_params))
            .await
            .map_err(|e| Error::ToolExecution(format!("{tool_name}: {e}")))?;

        let value = resp
            .into_result()
            .map_err(|e| Error::ToolExecution(format!("{tool_name}: {e}")))?;

        let result: ToolCallResult = serde_json::from_value(value)
            .map_err(|e| Error::ToolExecution(format!("{tool_name}: bad call result: {e}")))?;

        if result.is_error {
            let text = match extract_text(&result) {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return Err(Error::ToolExecution(format!("{tool_name}: {text}")));
        }

        Ok(extract_text(&result))
    }

    async fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::SeqCst);

        if let Some(task) = self.inner.reconnect_task.lock().take() {
            task.abort();
        }

        if let Some(transport) = self.inner.transport.write().await.take() {
            transport.shutdown().await;
        }
        self.inner.tools.write().clear();
        tracing::info!(source = %self.inner.source_name, "MCP skill source destroyed");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
