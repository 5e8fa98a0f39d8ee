//! The trimming algorithm: budget math, newest-first retention, and the
//! summary stand-in for everything older.

use maestro_domain::tool::Message;
use maestro_providers::LlmProvider;

use crate::estimate::{estimate_tokens, estimate_total};
use crate::summary;

/// Share of the history budget reserved for the summary message.
const SUMMARY_RESERVE: f64 = 0.2;
/// Minimum number of history messages kept once any history fits at all.
const MIN_KEPT: usize = 2;

/// Budget settings for one context window.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub max_tokens: usize,
    /// Head-room held back for the model's own output.
    pub reserved_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { max_tokens: 8_192, reserved_tokens: 1_024 }
    }
}

/// Fits `{system, history, current}` into the configured budget.
pub struct ContextManager {
    config: ContextConfig,
}

impl ContextManager {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Produce the ordered message list for one LLM call.
    ///
    /// The system message and every current-turn message are never trimmed.
    /// When history overflows, the oldest messages are replaced by a single
    /// system-role summary; summarisation failures degrade to a
    /// deterministic digest and never abort the request.
    pub async fn fit(
        &self,
        system: &Message,
        history: &[Message],
        current: &[Message],
        llm: Option<&dyn LlmProvider>,
    ) -> Vec<Message> {
        let budget = self.config.max_tokens.saturating_sub(self.config.reserved_tokens);
        let fixed = estimate_tokens(system) + estimate_total(current);

        if fixed >= budget {
            tracing::warn!(
                fixed_tokens = fixed,
                budget,
                "fixed messages alone exceed the context budget; dropping all history"
            );
            let mut out = vec![system.clone()];
            out.extend_from_slice(current);
            return out;
        }

        let history_budget = budget - fixed;
        if estimate_total(history) <= history_budget {
            let mut out = vec![system.clone()];
            out.extend_from_slice(history);
            out.extend_from_slice(current);
            return out;
        }

        // Walk newest to oldest, keeping messages inside 80% of the history
        // budget; the remaining 20% is reserved for the summary message.
        let keep_budget = (history_budget as f64 * (1.0 - SUMMARY_RESERVE)) as usize;
        let mut kept_tokens = 0usize;
        let mut keep_from = history.len();
        for (i, msg) in history.iter().enumerate().rev() {
            let next = estimate_tokens(msg);
            if kept_tokens + next > keep_budget {
                break;
            }
            kept_tokens += next;
            keep_from = i;
        }

        // Even an oversized tail keeps at least the last two messages.
        if history.len() - keep_from < MIN_KEPT {
            keep_from = history.len().saturating_sub(MIN_KEPT);
        }

        let (trimmed, kept) = history.split_at(keep_from);
        if trimmed.is_empty() {
            let mut out = vec![system.clone()];
            out.extend_from_slice(kept);
            out.extend_from_slice(current);
            return out;
        }

        let summary_text = match llm {
            Some(llm) => match summary::llm_summary(llm, trimmed).await {
                Some(text) => text,
                None => summary::fallback_summary(trimmed),
            },
            None => summary::fallback_summary(trimmed),
        };

        tracing::debug!(
            trimmed = trimmed.len(),
            kept = kept.len(),
            history_budget,
            "history trimmed behind summary"
        );

        let mut out = vec![system.clone(), Message::system(summary_text)];
        out.extend_from_slice(kept);
        out.extend_from_slice(current);
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
