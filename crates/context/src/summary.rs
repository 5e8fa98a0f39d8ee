//! Summary generation for trimmed history, with a deterministic fallback.

use maestro_domain::tool::{Message, Role};
use maestro_providers::{ChatRequest, LlmProvider};

/// Per-turn cap when building the summariser input.
const TURN_CHAR_CAP: usize = 500;
/// Total cap on the summariser input.
const INPUT_CHAR_CAP: usize = 3_000;
/// How many recent user messages the fallback digest lists.
const FALLBACK_MESSAGES: usize = 5;
/// Prefix length per fallback line.
const FALLBACK_PREFIX_CHARS: usize = 100;

/// Truncate to at most `max` characters (not bytes).
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

/// Concatenate user/assistant turns from the trimmed set, each capped at
/// 500 chars, the whole input at 3000.
fn build_summary_input(trimmed: &[Message]) -> String {
    let mut input = String::new();
    for msg in trimmed {
        let label = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            _ => continue,
        };
        let text = msg.content.extract_all_text();
        if text.is_empty() {
            continue;
        }
        let line = format!("{label}: {}\n", truncate_chars(&text, TURN_CHAR_CAP));
        if input.chars().count() + line.chars().count() > INPUT_CHAR_CAP {
            break;
        }
        input.push_str(&line);
    }
    input
}

/// Ask the LLM for a short recap of the trimmed turns.
///
/// Returns `None` on any failure (caller falls back to [`fallback_summary`]).
pub(crate) async fn llm_summary(
    llm: &dyn LlmProvider,
    trimmed: &[Message],
) -> Option<String> {
    let input = build_summary_input(trimmed);
    if input.is_empty() {
        return None;
    }

    let prompt = format!(
        "Summarize this conversation excerpt in at most 200 characters. \
         Keep goals, decisions, and facts; drop pleasantries.\n\n{input}"
    );

    let req = ChatRequest {
        messages: vec![Message::user(prompt)],
        tools: Vec::new(),
        temperature: Some(0.1),
        max_tokens: Some(200),
        model: None,
    };

    match llm.chat(&req).await {
        Ok(resp) if !resp.content.trim().is_empty() => Some(resp.content.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, "history summarisation failed, using fallback");
            None
        }
    }
}

/// Deterministic digest: up to five most-recent user-message prefixes plus
/// a trimmed count. Used when no LLM is injected or the call fails.
pub(crate) fn fallback_summary(trimmed: &[Message]) -> String {
    let recent: Vec<String> = trimmed
        .iter()
        .rev()
        .filter(|m| m.role == Role::User)
        .take(FALLBACK_MESSAGES)
        .map(|m| {
            format!(
                "- {}",
                truncate_chars(&m.content.extract_all_text(), FALLBACK_PREFIX_CHARS)
            )
        })
        .collect();

    if recent.is_empty() {
        return format!("[{} earlier messages trimmed from context]", trimmed.len());
    }

    let mut lines = recent;
    lines.reverse();
    format!(
        "[{} earlier messages trimmed. Recent user topics:]\n{}",
        trimmed.len(),
        lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn summary_input_skips_system_and_tool_turns() {
        let trimmed = vec![
            Message::system("guidance"),
            Message::user("question"),
            Message::assistant("reply"),
            Message::tool_reply("c1", "result"),
        ];
        let input = build_summary_input(&trimmed);
        assert!(input.contains("user: question"));
        assert!(input.contains("assistant: reply"));
        assert!(!input.contains("guidance"));
        assert!(!input.contains("result"));
    }

    #[test]
    fn summary_input_caps_total_length() {
        let trimmed: Vec<Message> =
            (0..20).map(|i| Message::user(format!("{i}-{}", "x".repeat(499)))).collect();
        let input = build_summary_input(&trimmed);
        assert!(input.chars().count() <= 3_000);
    }

    #[test]
    fn fallback_lists_recent_user_prefixes_oldest_first() {
        let trimmed: Vec<Message> = (0..8)
            .flat_map(|i| vec![Message::user(format!("topic {i}")), Message::assistant("ok")])
            .collect();
        let summary = fallback_summary(&trimmed);
        assert!(summary.starts_with("[16 earlier messages trimmed"));
        // Only the five most recent user messages survive, in order.
        assert!(!summary.contains("topic 2"));
        let pos3 = summary.find("topic 3").unwrap();
        let pos7 = summary.find("topic 7").unwrap();
        assert!(pos3 < pos7);
    }

    #[test]
    fn fallback_without_user_messages_still_counts() {
        let trimmed = vec![Message::assistant("a"), Message::assistant("b")];
        assert_eq!(fallback_summary(&trimmed), "[2 earlier messages trimmed from context]");
    }
}
