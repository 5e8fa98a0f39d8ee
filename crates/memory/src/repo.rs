//! Row-level persistence interface for long-term memory.
//!
//! The runtime consumes this narrow trait; a SQL/KV-backed implementation
//! lives with the embedding application. The in-memory implementation here
//! backs tests and single-process deployments, exposing committed state
//! only (every mutation happens under one write lock).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use maestro_domain::error::Result;

/// One persisted memory row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    /// Upsert key; `None` for append-only entries.
    #[serde(default)]
    pub key: Option<String>,
    pub content: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: None,
            content: content.into(),
            embedding: None,
            metadata: Value::Object(Default::default()),
            session_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Narrow repository interface consumed by [`crate::LongTermMemory`].
#[async_trait]
pub trait MemoryRepo: Send + Sync {
    async fn insert(&self, entry: MemoryEntry) -> Result<()>;

    /// Replace the row with the same `id`.
    async fn update(&self, entry: MemoryEntry) -> Result<()>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn get_by_id(&self, id: &str) -> Result<Option<MemoryEntry>>;

    async fn get_by_key(&self, key: &str) -> Result<Option<MemoryEntry>>;

    async fn list_by_session(&self, session_id: &str) -> Result<Vec<MemoryEntry>>;

    /// All rows carrying an embedding vector.
    async fn list_embedded(&self) -> Result<Vec<MemoryEntry>>;

    /// Case-insensitive substring scan over `content`, most recently
    /// updated first.
    async fn find_substring(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryMemoryRepo {
    rows: RwLock<HashMap<String, MemoryEntry>>,
}

impl InMemoryMemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryRepo for InMemoryMemoryRepo {
    async fn insert(&self, entry: MemoryEntry) -> Result<()> {
        self.rows.write().insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn update(&self, entry: MemoryEntry) -> Result<()> {
        self.rows.write().insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.rows.write().remove(id).is_some())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<MemoryEntry>> {
        Ok(self.rows.read().get(id).cloned())
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<MemoryEntry>> {
        Ok(self
            .rows
            .read()
            .values()
            .find(|e| e.key.as_deref() == Some(key))
            .cloned())
    }

    async fn list_by_session(&self, session_id: &str) -> Result<Vec<MemoryEntry>> {
        let mut rows: Vec<MemoryEntry> = self
            .rows
            .read()
            .values()
            .filter(|e| e.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    async fn list_embedded(&self) -> Result<Vec<MemoryEntry>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|e| e.embedding.is_some())
            .cloned()
            .collect())
    }

    async fn find_substring(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        let needle = query.to_lowercase();
        let mut rows: Vec<MemoryEntry> = self
            .rows
            .read()
            .values()
            .filter(|e| e.content.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_get_delete_roundtrip() {
        let repo = InMemoryMemoryRepo::new();
        let entry = MemoryEntry::new("remember me");
        let id = entry.id.clone();
        repo.insert(entry).await.unwrap();

        assert_eq!(repo.get_by_id(&id).await.unwrap().unwrap().content, "remember me");
        assert!(repo.delete(&id).await.unwrap());
        assert!(!repo.delete(&id).await.unwrap());
        assert!(repo.get_by_id(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn key_lookup_finds_keyed_rows_only() {
        let repo = InMemoryMemoryRepo::new();
        let mut keyed = MemoryEntry::new("v1");
        keyed.key = Some("color".into());
        repo.insert(keyed).await.unwrap();
        repo.insert(MemoryEntry::new("unkeyed")).await.unwrap();

        assert_eq!(repo.get_by_key("color").await.unwrap().unwrap().content, "v1");
        assert!(repo.get_by_key("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn substring_scan_is_case_insensitive_and_recent_first() {
        let repo = InMemoryMemoryRepo::new();
        let mut older = MemoryEntry::new("The Rust borrow checker");
        older.updated_at = Utc::now() - chrono::Duration::seconds(60);
        repo.insert(older).await.unwrap();
        repo.insert(MemoryEntry::new("rust lifetimes explained")).await.unwrap();
        repo.insert(MemoryEntry::new("unrelated note")).await.unwrap();

        let hits = repo.find_substring("RUST", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "rust lifetimes explained");

        let limited = repo.find_substring("rust", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn list_embedded_filters_vectorless_rows() {
        let repo = InMemoryMemoryRepo::new();
        let mut with = MemoryEntry::new("embedded");
        with.embedding = Some(vec![0.1, 0.2]);
        repo.insert(with).await.unwrap();
        repo.insert(MemoryEntry::new("plain")).await.unwrap();

        let rows = repo.list_embedded().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "embedded");
    }
}
