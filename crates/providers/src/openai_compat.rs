//! Indexed-delta streaming adapter (OpenAI-compatible chat completions).
//!
//! Tool calls stream as deltas tagged with a call index plus an optional
//! id on the first fragment; the stream ends with a `finish_reason` chunk
//! or the `[DONE]` sentinel. The id/index bookkeeping is resolved here so
//! downstream consumers see one coherent call id per tool call.

use crate::sse;
use crate::traits::{
    from_reqwest, ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider,
    ProviderConfig,
};
use maestro_domain::error::{Error, Result};
use maestro_domain::stream::{BoxStream, StreamChunk, Usage};
use maestro_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        if cfg.api_key.is_empty() {
            return Err(Error::Config(format!("provider {}: missing api key", cfg.id)));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            default_model: cfg.default_model.clone(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let model = req.model.clone().unwrap_or_else(|| self.default_model.clone());

        let messages: Vec<Value> = req.messages.iter().map(message_to_wire).collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn message_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::System => serde_json::json!({
            "role": "system",
            "content": msg.content.extract_all_text(),
        }),
        Role::User => match &msg.content {
            MessageContent::Text(t) => serde_json::json!({
                "role": "user",
                "content": t,
            }),
            MessageContent::Parts(parts) => {
                let content: Vec<Value> = parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => serde_json::json!({
                            "type": "text",
                            "text": text,
                        }),
                        ContentPart::Image { url, .. } => serde_json::json!({
                            "type": "image_url",
                            "image_url": {"url": url},
                        }),
                    })
                    .collect();
                serde_json::json!({
                    "role": "user",
                    "content": content,
                })
            }
        },
        Role::Assistant => {
            let mut wire = serde_json::json!({
                "role": "assistant",
                "content": msg.content.extract_all_text(),
            });
            if !msg.tool_calls.is_empty() {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        serde_json::json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {"name": tc.name, "arguments": tc.arguments},
                        })
                    })
                    .collect();
                wire["tool_calls"] = Value::Array(calls);
            }
            wire
        }
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
            "content": msg.content.extract_all_text(),
        }),
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        },
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Llm("response has no choices".into()))?;

    let message = choice.get("message").unwrap_or(&Value::Null);
    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Ok(ChatResponse {
        content,
        tool_calls: parse_wire_tool_calls(message),
        usage: body.get("usage").and_then(parse_usage),
        model: body.get("model").and_then(|v| v.as_str()).unwrap_or("unknown").to_string(),
        finish_reason: choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    })
}

fn parse_wire_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let name = func.get("name")?.as_str()?.to_string();
            let arguments = func.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}").to_string();
            Some(ToolCall { id, name, arguments })
        })
        .collect()
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maps stream call indices to the id announced on the first fragment,
/// so argument deltas (which carry only the index) resolve to a stable id.
struct StreamState {
    /// index -> (call_id, tool_name, args_buffer).
    calls_by_index: std::collections::HashMap<u64, (String, String, String)>,
    done_emitted: bool,
}

impl StreamState {
    fn new() -> Self {
        Self { calls_by_index: std::collections::HashMap::new(), done_emitted: false }
    }

    /// Flush every assembled call as a ToolCallFinished chunk.
    fn flush_calls(&mut self) -> Vec<Result<StreamChunk>> {
        let mut indices: Vec<u64> = self.calls_by_index.keys().copied().collect();
        indices.sort_unstable();
        indices
            .into_iter()
            .filter_map(|idx| self.calls_by_index.remove(&idx))
            .map(|(call_id, tool_name, arguments)| {
                Ok(StreamChunk::ToolCallFinished { call_id, tool_name, arguments })
            })
            .collect()
    }
}

fn parse_stream_data(data: &str, state: &mut StreamState) -> Vec<Result<StreamChunk>> {
    if data.trim() == "[DONE]" {
        let mut chunks = state.flush_calls();
        if !state.done_emitted {
            state.done_emitted = true;
            chunks.push(Ok(StreamChunk::Done { usage: None, finish_reason: Some("stop".into()) }));
        }
        return chunks;
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let choice = v.get("choices").and_then(|c| c.as_array()).and_then(|a| a.first());

    // Usage-only chunk (stream_options.include_usage).
    let choice = match choice {
        Some(c) => c,
        None => {
            if let Some(usage) = v.get("usage").and_then(parse_usage) {
                state.done_emitted = true;
                let mut chunks = state.flush_calls();
                chunks.push(Ok(StreamChunk::Done { usage: Some(usage), finish_reason: None }));
                return chunks;
            }
            return Vec::new();
        }
    };

    let mut chunks = Vec::new();
    let delta = choice.get("delta").unwrap_or(&Value::Null);

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_arr {
            let idx = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);

            if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                chunks.push(Ok(StreamChunk::ToolCallStarted {
                    call_id: id.to_string(),
                    tool_name: name.to_string(),
                }));
                state
                    .calls_by_index
                    .entry(idx)
                    .or_insert_with(|| (id.to_string(), name.to_string(), String::new()));
            }

            if let Some(args) = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
            {
                if !args.is_empty() {
                    // Some backends never send an id; key the call by index.
                    let entry = state.calls_by_index.entry(idx).or_insert_with(|| {
                        (idx.to_string(), String::new(), String::new())
                    });
                    entry.2.push_str(args);
                    chunks.push(Ok(StreamChunk::ToolCallDelta {
                        call_id: entry.0.clone(),
                        delta: args.to_string(),
                    }));
                }
            }
        }
    }

    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            chunks.push(Ok(StreamChunk::Content { delta: text.to_string() }));
        }
    }

    // Finish reason terminates the logical message; assembled calls flush here.
    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        chunks.extend(state.flush_calls());
        state.done_emitted = true;
        chunks.push(Ok(StreamChunk::Done {
            usage: v.get("usage").and_then(parse_usage),
            finish_reason: Some(fr.to_string()),
        }));
    }

    chunks
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, false);

        tracing::debug!(provider = %self.id, url = %url, "chat request");

        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "{}: HTTP {} - {}",
                self.id,
                status.as_u16(),
                resp_text
            )));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_chat_response(&resp_json)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, true);

        tracing::debug!(provider = %self.id, url = %url, "stream request");

        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Llm(format!(
                "{}: HTTP {} - {}",
                self.id,
                status.as_u16(),
                err_text
            )));
        }

        let mut state = StreamState::new();
        Ok(sse::sse_response_stream(resp, move |data| parse_stream_data(data, &mut state)))
    }

    async fn embeddings(&self, req: &EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| "text-embedding-3-small".into()),
            "input": req.input,
        });

        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "{}: HTTP {} - {}",
                self.id,
                status.as_u16(),
                resp_text
            )));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        let embeddings = resp_json
            .get("data")
            .and_then(|d| d.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|item| {
                        item.get("embedding").and_then(|e| e.as_array()).map(|vals| {
                            vals.iter()
                                .filter_map(|v| v.as_f64())
                                .map(|f| f as f32)
                                .collect::<Vec<f32>>()
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(EmbeddingsResponse { embeddings })
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
