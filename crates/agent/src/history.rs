//! Chat history persistence, consumed through a narrow repository trait.
//!
//! The trait carries the superset session surface (pin toggle, title
//! update) so gateways with either shape can implement it. The in-memory
//! implementation backs tests and single-process runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use maestro_domain::error::{Error, Result};
use maestro_domain::tool::Message;

/// Session row tracked by the history store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Narrow persistence interface for conversation history.
#[async_trait]
pub trait HistoryRepo: Send + Sync {
    /// Append a message; returns its id. Creates the session on first use.
    async fn save_message(&self, session_id: &str, message: Message) -> Result<String>;

    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    async fn create_session(&self, session_id: &str) -> Result<SessionRecord>;

    async fn delete_session(&self, session_id: &str) -> Result<bool>;

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>>;

    async fn set_pinned(&self, session_id: &str, pinned: bool) -> Result<bool>;

    async fn set_title(&self, session_id: &str, title: &str) -> Result<bool>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SessionData {
    record: SessionRecord,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct InMemoryHistoryRepo {
    sessions: RwLock<HashMap<String, SessionData>>,
}

impl InMemoryHistoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_record(session_id: &str) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id: session_id.to_string(),
            title: None,
            pinned: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
impl HistoryRepo for InMemoryHistoryRepo {
    async fn save_message(&self, session_id: &str, message: Message) -> Result<String> {
        let mut sessions = self.sessions.write();
        let data = sessions.entry(session_id.to_string()).or_insert_with(|| SessionData {
            record: Self::new_record(session_id),
            messages: Vec::new(),
        });
        data.messages.push(message);
        data.record.updated_at = Utc::now();
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .sessions
            .read()
            .get(session_id)
            .map(|d| d.messages.clone())
            .unwrap_or_default())
    }

    async fn create_session(&self, session_id: &str) -> Result<SessionRecord> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(session_id) {
            return Err(Error::Other(format!("session {session_id} already exists")));
        }
        let record = Self::new_record(session_id);
        sessions.insert(
            session_id.to_string(),
            SessionData { record: record.clone(), messages: Vec::new() },
        );
        Ok(record)
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.write().remove(session_id).is_some())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut records: Vec<SessionRecord> =
            self.sessions.read().values().map(|d| d.record.clone()).collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    async fn set_pinned(&self, session_id: &str, pinned: bool) -> Result<bool> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(session_id) {
            Some(data) => {
                data.record.pinned = pinned;
                data.record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_title(&self, session_id: &str, title: &str) -> Result<bool> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(session_id) {
            Some(data) => {
                data.record.title = Some(title.to_string());
                data.record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_creates_session_and_preserves_order() {
        let repo = InMemoryHistoryRepo::new();
        repo.save_message("s1", Message::user("first")).await.unwrap();
        repo.save_message("s1", Message::assistant("second")).await.unwrap();

        let messages = repo.get_messages("s1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content.extract_all_text(), "first");
        assert_eq!(repo.list_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_twice_errors() {
        let repo = InMemoryHistoryRepo::new();
        repo.create_session("s1").await.unwrap();
        assert!(repo.create_session("s1").await.is_err());
    }

    #[tokio::test]
    async fn pin_and_title_updates() {
        let repo = InMemoryHistoryRepo::new();
        repo.create_session("s1").await.unwrap();

        assert!(repo.set_pinned("s1", true).await.unwrap());
        assert!(repo.set_title("s1", "Weather chat").await.unwrap());
        assert!(!repo.set_pinned("ghost", true).await.unwrap());

        let sessions = repo.list_sessions().await.unwrap();
        assert!(sessions[0].pinned);
        assert_eq!(sessions[0].title.as_deref(), Some("Weather chat"));
    }

    #[tokio::test]
    async fn delete_session_drops_messages() {
        let repo = InMemoryHistoryRepo::new();
        repo.save_message("s1", Message::user("hi")).await.unwrap();
        assert!(repo.delete_session("s1").await.unwrap());
        assert!(!repo.delete_session("s1").await.unwrap());
        assert!(repo.get_messages("s1").await.unwrap().is_empty());
    }
}
