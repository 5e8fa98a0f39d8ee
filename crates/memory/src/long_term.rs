//! Long-term memory: keyed upsert + append-only recall entries, searched
//! by cosine similarity when an embedder is configured and by substring
//! scan otherwise.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use maestro_domain::error::Result;

use crate::repo::{MemoryEntry, MemoryRepo};

/// Injected embedding function; absence disables vector recall.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Cosine similarity `(a·b) / (‖a‖·‖b‖)`.
///
/// Returns 0 when either norm is zero or the lengths mismatch, so a bad
/// row degrades to "irrelevant" instead of poisoning the ranking.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LongTermMemory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LongTermMemory {
    repo: Arc<dyn MemoryRepo>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl LongTermMemory {
    pub fn new(repo: Arc<dyn MemoryRepo>, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { repo, embedder }
    }

    /// Embed one text, tolerating embedder failure (the entry is stored
    /// without a vector and a warning is logged).
    async fn try_embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(&[text.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => Some(vectors.swap_remove(0)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, storing entry without vector");
                None
            }
        }
    }

    /// Fetch a keyed value, decoding JSON content back to a value.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let entry = match self.repo.get_by_key(key).await? {
            Some(e) => e,
            None => return Ok(None),
        };
        let value = serde_json::from_str(&entry.content)
            .unwrap_or(Value::String(entry.content));
        Ok(Some(value))
    }

    /// Upsert by key. Strings are stored raw; other values as JSON text.
    pub async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let content = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let embedding = self.try_embed(&content).await;

        match self.repo.get_by_key(key).await? {
            Some(mut entry) => {
                entry.content = content;
                entry.embedding = embedding;
                entry.updated_at = Utc::now();
                self.repo.update(entry).await
            }
            None => {
                let mut entry = MemoryEntry::new(content);
                entry.key = Some(key.to_string());
                entry.embedding = embedding;
                self.repo.insert(entry).await
            }
        }
    }

    /// Append a recall entry; returns its fresh id.
    pub async fn remember(
        &self,
        content: &str,
        metadata: Option<Value>,
        session_id: Option<&str>,
    ) -> Result<String> {
        let mut entry = MemoryEntry::new(content);
        if let Some(meta) = metadata {
            entry.metadata = meta;
        }
        entry.session_id = session_id.map(|s| s.to_string());
        entry.embedding = self.try_embed(content).await;

        let id = entry.id.clone();
        self.repo.insert(entry).await?;
        Ok(id)
    }

    /// Delete by id; true when a row was removed.
    pub async fn forget(&self, id: &str) -> Result<bool> {
        self.repo.delete(id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<MemoryEntry>> {
        self.repo.get_by_id(id).await
    }

    /// Rank entries against the query: vector recall when possible,
    /// substring scan otherwise.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        if let Some(embedder) = &self.embedder {
            match embedder.embed(&[query.to_string()]).await {
                Ok(mut vectors) if !vectors.is_empty() => {
                    let query_vec = vectors.swap_remove(0);
                    let rows = self.repo.list_embedded().await?;
                    let mut scored: Vec<(f32, MemoryEntry)> = rows
                        .into_iter()
                        .map(|e| {
                            let score = e
                                .embedding
                                .as_deref()
                                .map(|v| cosine_similarity(&query_vec, v))
                                .unwrap_or(0.0);
                            (score, e)
                        })
                        .collect();
                    scored.sort_by(|a, b| {
                        b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal)
                    });
                    return Ok(scored.into_iter().take(limit).map(|(_, e)| e).collect());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "query embedding failed, falling back to substring search");
                }
            }
        }
        self.repo.find_substring(query, limit).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::InMemoryMemoryRepo;
    use maestro_domain::error::Error;

    /// Embedder mapping known texts to fixed vectors; unknown texts error.
    struct TableEmbedder {
        table: Vec<(&'static str, Vec<f32>)>,
        fail: bool,
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                return Err(Error::Llm("embedder offline".into()));
            }
            Ok(texts
                .iter()
                .map(|t| {
                    self.table
                        .iter()
                        .find(|(k, _)| t.contains(k))
                        .map(|(_, v)| v.clone())
                        .unwrap_or_else(|| vec![0.0, 0.0, 1.0])
                })
                .collect())
        }
    }

    fn memory_with_embedder(fail: bool) -> LongTermMemory {
        let embedder = TableEmbedder {
            table: vec![
                ("coffee", vec![1.0, 0.0, 0.0]),
                ("tea", vec![0.9, 0.1, 0.0]),
                ("trains", vec![0.0, 1.0, 0.0]),
            ],
            fail,
        };
        LongTermMemory::new(Arc::new(InMemoryMemoryRepo::new()), Some(Arc::new(embedder)))
    }

    // ── cosine ──────────────────────────────────────────────────────

    #[test]
    fn cosine_self_similarity_is_one() {
        let v = vec![0.3, -0.2, 0.9];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_is_symmetric() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-1.0, 0.5, 2.0];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn cosine_zero_vector_and_mismatch_yield_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    // ── keyed values ────────────────────────────────────────────────

    #[tokio::test]
    async fn set_get_overwrites_by_key() {
        let mem = LongTermMemory::new(Arc::new(InMemoryMemoryRepo::new()), None);
        mem.set("color", &Value::String("blue".into())).await.unwrap();
        assert_eq!(mem.get("color").await.unwrap().unwrap(), Value::String("blue".into()));

        mem.set("color", &serde_json::json!({"hue": 200})).await.unwrap();
        assert_eq!(mem.get("color").await.unwrap().unwrap()["hue"], 200);
        assert!(mem.get("shape").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remember_returns_retrievable_id() {
        let mem = LongTermMemory::new(Arc::new(InMemoryMemoryRepo::new()), None);
        let id = mem.remember("user prefers dark mode", None, Some("s1")).await.unwrap();
        let entry = mem.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(entry.content, "user prefers dark mode");
        assert_eq!(entry.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn forget_true_exactly_once() {
        let mem = LongTermMemory::new(Arc::new(InMemoryMemoryRepo::new()), None);
        let id = mem.remember("temp", None, None).await.unwrap();
        assert!(mem.forget(&id).await.unwrap());
        assert!(!mem.forget(&id).await.unwrap());
    }

    // ── search ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn vector_search_ranks_by_similarity() {
        let mem = memory_with_embedder(false);
        mem.remember("likes coffee in the morning", None, None).await.unwrap();
        mem.remember("drinks tea at night", None, None).await.unwrap();
        mem.remember("collects model trains", None, None).await.unwrap();

        let hits = mem.search("coffee", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].content.contains("coffee"));
        assert!(hits[1].content.contains("tea"));
    }

    #[tokio::test]
    async fn embedder_failure_at_search_falls_back_to_substring() {
        let mem = memory_with_embedder(false);
        mem.remember("session notes about coffee", None, None).await.unwrap();

        // Swap in a failing embedder over the same repo contents.
        let failing = memory_with_embedder(true);
        failing.repo.insert(MemoryEntry::new("substring coffee hit")).await.unwrap();
        let hits = failing.search("COFFEE", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "substring coffee hit");
    }

    #[tokio::test]
    async fn embedder_failure_at_write_still_stores() {
        let mem = memory_with_embedder(true);
        let id = mem.remember("stored without vector", None, None).await.unwrap();
        let entry = mem.get_by_id(&id).await.unwrap().unwrap();
        assert!(entry.embedding.is_none());
    }

    #[tokio::test]
    async fn no_embedder_uses_substring_directly() {
        let mem = LongTermMemory::new(Arc::new(InMemoryMemoryRepo::new()), None);
        mem.remember("plain text entry about rust", None, None).await.unwrap();
        let hits = mem.search("rust", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}
