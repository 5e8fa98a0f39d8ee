use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task lifecycle; transitions only pending → running → {completed, failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One persisted task. `description` is either free-form text (noted and
/// echoed) or a JSON object `{"tool": ..., "params": ...}` dispatched
/// through the skill registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub session_id: String,
    pub description: String,
    pub status: TaskStatus,
    /// Ids of tasks in the same session that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(session_id: &str, description: &str, dependencies: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            dependencies,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One derived dependency edge, `from` completing before `to` may start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagEdge {
    pub from: String,
    pub to: String,
}

/// A session's tasks plus the edge list derived from their dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagView {
    pub tasks: Vec<Task>,
    pub edges: Vec<DagEdge>,
}
