//! Token estimation shared by every budget check.

use maestro_domain::tool::Message;

/// Estimate the token cost of a message as `ceil(chars / 3)`, counting the
/// text content plus the serialized tool calls when present.
///
/// The divisor is a deliberate conservative approximation for mixed
/// ASCII/CJK text. It is reused verbatim by every caller so budget
/// decisions are reproducible; do not "improve" it locally.
pub fn estimate_tokens(msg: &Message) -> usize {
    let mut chars = msg.content.extract_all_text().chars().count();
    if !msg.tool_calls.is_empty() {
        chars += serde_json::to_string(&msg.tool_calls)
            .map(|s| s.chars().count())
            .unwrap_or(0);
    }
    chars.div_ceil(3)
}

/// Sum of [`estimate_tokens`] over a slice.
pub fn estimate_total(messages: &[Message]) -> usize {
    messages.iter().map(estimate_tokens).sum()
}
