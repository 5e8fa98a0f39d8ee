use serde::Serialize;
use serde_json::Value;

use crate::stream::Usage;

/// Events surfaced to clients while an agent run (or a DAG execution)
/// advances. Each serialises as a flat JSON object tagged by `type`,
/// suitable for SSE or WebSocket framing by an outer gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    /// Incremental assistant text.
    #[serde(rename = "content")]
    Content { text: String },

    /// Rationale extracted from a planning call.
    #[serde(rename = "thought")]
    Thought { text: String },

    /// Ordered plan steps.
    #[serde(rename = "plan")]
    Plan { steps: Vec<String> },

    /// A tool invocation begins.
    #[serde(rename = "action")]
    Action { tool: String, input: Value },

    /// A tool result or error fed back to the model.
    #[serde(rename = "observation")]
    Observation {
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// A DAG task was persisted.
    #[serde(rename = "task_created")]
    TaskCreated { task_id: String, description: String },

    /// A DAG task finished successfully.
    #[serde(rename = "task_completed")]
    TaskCompleted { task_id: String, result: String },

    /// A DAG task failed; dependents stay pending.
    #[serde(rename = "task_failed")]
    TaskFailed { task_id: String, error: String },

    /// The final assistant text for the run.
    #[serde(rename = "answer")]
    Answer {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// The run ended abnormally.
    #[serde(rename = "error")]
    Error { message: String },
}

impl ExecutionEvent {
    pub fn observation(content: impl Into<String>) -> Self {
        Self::Observation { content: content.into(), is_error: false }
    }

    pub fn observation_error(content: impl Into<String>) -> Self {
        Self::Observation { content: content.into(), is_error: true }
    }
}
