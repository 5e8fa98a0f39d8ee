//! Content-block streaming adapter (Anthropic Messages API shape).
//!
//! System messages travel in a separate top-level `system` field; tool
//! results are user messages with `tool_result` blocks; streaming frames
//! content blocks with `content_block_start` / `_delta` / `_stop` events
//! and a terminal `message_stop`.

use crate::sse;
use crate::traits::{
    from_reqwest, ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider,
    ProviderConfig,
};
use maestro_domain::error::{Error, Result};
use maestro_domain::stream::{BoxStream, StreamChunk, Usage};
use maestro_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
use serde_json::Value;

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
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

    // ── Internal helpers ───────────────────────────────────────────

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_messages_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let model = req.model.clone().unwrap_or_else(|| self.default_model.clone());

        // Separate out system messages.
        let mut system_parts: Vec<String> = Vec::new();
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.extract_all_text()),
                Role::User => api_messages.push(user_msg_to_wire(msg)),
                Role::Assistant => api_messages.push(assistant_msg_to_wire(msg)),
                Role::Tool => api_messages.push(tool_reply_to_wire(msg)),
            }
        }

        let mut body = serde_json::json!({
            "model": model,
            "messages": api_messages,
            "stream": stream,
        });

        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }

        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body["max_tokens"] = serde_json::json!(req.max_tokens.unwrap_or(4096));

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn user_msg_to_wire(msg: &Message) -> Value {
    match &msg.content {
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
                    ContentPart::Image { url, media_type } => serde_json::json!({
                        "type": "image",
                        "source": {
                            "type": "url",
                            "url": url,
                            "media_type": media_type.as_deref().unwrap_or("image/png"),
                        }
                    }),
                })
                .collect();
            serde_json::json!({
                "role": "user",
                "content": content,
            })
        }
    }
}

fn assistant_msg_to_wire(msg: &Message) -> Value {
    let mut content: Vec<Value> = Vec::new();
    let text = msg.content.extract_all_text();
    if !text.is_empty() {
        content.push(serde_json::json!({"type": "text", "text": text}));
    }
    for tc in &msg.tool_calls {
        let input: Value = serde_json::from_str(&tc.arguments)
            .unwrap_or_else(|_| Value::Object(Default::default()));
        content.push(serde_json::json!({
            "type": "tool_use",
            "id": tc.id,
            "name": tc.name,
            "input": input,
        }));
    }
    serde_json::json!({
        "role": "assistant",
        "content": content,
    })
}

fn tool_reply_to_wire(msg: &Message) -> Value {
    // Tool results are user messages with tool_result content blocks.
    serde_json::json!({
        "role": "user",
        "content": [{
            "type": "tool_result",
            "tool_use_id": msg.tool_call_id.as_deref().unwrap_or(""),
            "content": msg.content.extract_all_text(),
        }],
    })
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(body: &Value) -> Result<ChatResponse> {
    let empty = Vec::new();
    let content_arr = body.get("content").and_then(|v| v.as_array()).unwrap_or(&empty);

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in content_arr {
        match block.get("type").and_then(|v| v.as_str()).unwrap_or("") {
            "text" => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text_parts.push(t.to_string());
                }
            }
            "tool_use" => {
                let input = block.get("input").cloned().unwrap_or(Value::Object(Default::default()));
                tool_calls.push(ToolCall {
                    id: block.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                    name: block.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                    arguments: input.to_string(),
                });
            }
            _ => {}
        }
    }

    let finish_reason = body
        .get("stop_reason")
        .and_then(|v| v.as_str())
        .map(normalize_stop_reason);

    Ok(ChatResponse {
        content: text_parts.join(""),
        tool_calls,
        usage: body.get("usage").and_then(parse_usage),
        model: body.get("model").and_then(|v| v.as_str()).unwrap_or("unknown").to_string(),
        finish_reason,
    })
}

fn normalize_stop_reason(s: &str) -> String {
    match s {
        "end_turn" => "stop".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens")?.as_u64()? as u32;
    let output = v.get("output_tokens")?.as_u64()? as u32;
    Some(Usage {
        prompt_tokens: input,
        completion_tokens: output,
        total_tokens: input + output,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool-call assembly state across content-block events.
struct StreamState {
    /// block index -> (call_id, name, args_buffer).
    active_tool_calls: std::collections::HashMap<u64, (String, String, String)>,
    /// Usage captured at message_start, completed at message_delta.
    usage: Option<Usage>,
    done_emitted: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            active_tool_calls: std::collections::HashMap::new(),
            usage: None,
            done_emitted: false,
        }
    }
}

/// Parse one SSE data payload into zero or more stream chunks.
fn parse_stream_data(data: &str, state: &mut StreamState) -> Vec<Result<StreamChunk>> {
    let mut chunks = Vec::new();

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            chunks.push(Err(Error::Json(e)));
            return chunks;
        }
    };

    match v.get("type").and_then(|v| v.as_str()).unwrap_or("") {
        "message_start" => {
            if let Some(msg) = v.get("message") {
                state.usage = msg.get("usage").and_then(parse_usage);
            }
        }

        "content_block_start" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                if block.get("type").and_then(|v| v.as_str()) == Some("tool_use") {
                    let call_id =
                        block.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let name =
                        block.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    chunks.push(Ok(StreamChunk::ToolCallStarted {
                        call_id: call_id.clone(),
                        tool_name: name.clone(),
                    }));
                    state.active_tool_calls.insert(idx, (call_id, name, String::new()));
                }
            }
        }

        "content_block_delta" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(delta) = v.get("delta") {
                match delta.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                            if !text.is_empty() {
                                chunks.push(Ok(StreamChunk::Content { delta: text.to_string() }));
                            }
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta.get("partial_json").and_then(|v| v.as_str()) {
                            if let Some(tc) = state.active_tool_calls.get_mut(&idx) {
                                tc.2.push_str(partial);
                                chunks.push(Ok(StreamChunk::ToolCallDelta {
                                    call_id: tc.0.clone(),
                                    delta: partial.to_string(),
                                }));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        "content_block_stop" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some((call_id, tool_name, args)) = state.active_tool_calls.remove(&idx) {
                chunks.push(Ok(StreamChunk::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments: args,
                }));
            }
        }

        "message_delta" => {
            if let Some(output) = v
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(|v| v.as_u64())
            {
                if let Some(ref mut u) = state.usage {
                    u.completion_tokens = output as u32;
                    u.total_tokens = u.prompt_tokens + u.completion_tokens;
                }
            }
            let stop_reason = v
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|v| v.as_str())
                .map(normalize_stop_reason);
            if stop_reason.is_some() {
                state.done_emitted = true;
                chunks.push(Ok(StreamChunk::Done {
                    usage: state.usage.clone(),
                    finish_reason: stop_reason,
                }));
            }
        }

        "message_stop" => {
            if !state.done_emitted {
                state.done_emitted = true;
                chunks.push(Ok(StreamChunk::Done {
                    usage: state.usage.clone(),
                    finish_reason: Some("stop".into()),
                }));
            }
        }

        "error" => {
            let msg = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            chunks.push(Ok(StreamChunk::Error { message: msg.to_string() }));
        }

        // ping or unknown event types -- ignore.
        _ => {}
    }

    chunks
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_messages_body(req, false);

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
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_messages_body(req, true);

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

    async fn embeddings(&self, _req: &EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        // No native embeddings API for this wire shape.
        Err(Error::Llm(format!(
            "{}: embeddings not supported; use an OpenAI-compatible provider",
            self.id
        )))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn run_events(events: &[&str]) -> (Vec<StreamChunk>, StreamState) {
        let mut state = StreamState::new();
        let mut out = Vec::new();
        for data in events {
            for c in parse_stream_data(data, &mut state) {
                out.push(c.unwrap());
            }
        }
        (out, state)
    }

    #[test]
    fn text_deltas_become_content_chunks() {
        let (chunks, _) = run_events(&[
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" there"}}"#,
        ]);
        assert!(matches!(&chunks[0], StreamChunk::Content { delta } if delta == "Hi"));
        assert!(matches!(&chunks[1], StreamChunk::Content { delta } if delta == " there"));
    }

    #[test]
    fn tool_call_assembled_across_block_events() {
        let (chunks, state) = run_events(&[
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"files.list"}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"path\":"}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\".\"}"}}"#,
            r#"{"type":"content_block_stop","index":1}"#,
        ]);
        assert!(state.active_tool_calls.is_empty());
        let finished = chunks
            .iter()
            .find_map(|c| match c {
                StreamChunk::ToolCallFinished { call_id, tool_name, arguments } => {
                    Some((call_id.clone(), tool_name.clone(), arguments.clone()))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(finished.0, "toolu_1");
        assert_eq!(finished.1, "files.list");
        assert_eq!(finished.2, r#"{"path":"."}"#);
    }

    #[test]
    fn message_delta_with_stop_reason_emits_done_once() {
        let (chunks, _) = run_events(&[
            r#"{"type":"message_start","message":{"usage":{"input_tokens":12,"output_tokens":0}}}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":7}}"#,
            r#"{"type":"message_stop"}"#,
        ]);
        let dones: Vec<_> =
            chunks.iter().filter(|c| matches!(c, StreamChunk::Done { .. })).collect();
        assert_eq!(dones.len(), 1);
        match dones[0] {
            StreamChunk::Done { usage, finish_reason } => {
                assert_eq!(finish_reason.as_deref(), Some("tool_calls"));
                let u = usage.as_ref().unwrap();
                assert_eq!(u.prompt_tokens, 12);
                assert_eq!(u.completion_tokens, 7);
                assert_eq!(u.total_tokens, 19);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn assistant_message_with_calls_serializes_tool_use_blocks() {
        let msg = Message::assistant_with_calls(
            "on it",
            vec![ToolCall {
                id: "toolu_9".into(),
                name: "echo".into(),
                arguments: r#"{"text":"hi"}"#.into(),
            }],
        );
        let wire = assistant_msg_to_wire(&msg);
        let content = wire["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "tool_use");
        assert_eq!(content[1]["input"]["text"], "hi");
    }

    #[test]
    fn tool_reply_serializes_as_user_tool_result() {
        let wire = tool_reply_to_wire(&Message::tool_reply("toolu_9", "done"));
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"][0]["type"], "tool_result");
        assert_eq!(wire["content"][0]["tool_use_id"], "toolu_9");
    }

    #[test]
    fn parse_chat_response_extracts_calls() {
        let body = serde_json::json!({
            "model": "m",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "t1", "name": "files.list", "input": {"path": "."}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 5, "output_tokens": 9}
        });
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.content, "Let me check.");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
    }
}
