//! Short-term, per-session key/value memory.
//!
//! Each session owns a [`SessionStore`] (opaque JSON values with optional
//! TTL). The [`ShortTermManager`] bounds the number of live sessions:
//! creating a session past the cap evicts the least-recently-accessed 10%
//! (rounded up, at least one), and a background sweep re-runs the same
//! check every five minutes.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

/// Sweep interval for the background overflow/TTL check.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Fraction of `max_sessions` evicted on overflow.
const EVICT_FRACTION: f64 = 0.1;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StoredValue {
    value: Value,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|t| now >= t).unwrap_or(false)
    }
}

/// Keyed opaque values for one session. No semantic search.
#[derive(Default)]
pub struct SessionStore {
    values: Mutex<HashMap<String, StoredValue>>,
}

impl SessionStore {
    /// Returns `None` on missing or expired keys; expired entries are
    /// dropped on the way out.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut values = self.values.lock();
        let now = Instant::now();
        match values.get(key) {
            Some(v) if v.is_expired(now) => {
                values.remove(key);
                None
            }
            Some(v) => Some(v.value.clone()),
            None => None,
        }
    }

    /// Unconditional write with an optional time-to-live.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Option<Duration>) {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.values.lock().insert(key.into(), StoredValue { value, expires_at });
    }

    pub fn delete(&self, key: &str) -> bool {
        self.values.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.values.lock().clear();
    }

    /// Drop expired entries; returns how many were removed.
    fn prune_expired(&self) -> usize {
        let mut values = self.values.lock();
        let now = Instant::now();
        let before = values.len();
        values.retain(|_, v| !v.is_expired(now));
        before - values.len()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ShortTermManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ManagerInner {
    /// Session maps; mutations serialize per session inside SessionStore.
    sessions: RwLock<HashMap<String, Arc<SessionStore>>>,
    /// LRU index, locked independently of the session maps.
    access: Mutex<HashMap<String, Instant>>,
    max_sessions: usize,
}

impl ManagerInner {
    /// Evict the least-recently-accessed sessions when `incoming` more
    /// would overflow the cap. Runs under the caller's write lock so a
    /// concurrent creation cannot slip past the bound.
    fn enforce_limit(&self, sessions: &mut HashMap<String, Arc<SessionStore>>, incoming: usize) {
        if sessions.len() + incoming <= self.max_sessions {
            return;
        }

        let evict_count = ((self.max_sessions as f64 * EVICT_FRACTION).ceil() as usize).max(1);
        let victims: Vec<String> = {
            let access = self.access.lock();
            let mut by_age: Vec<(&String, &Instant)> = access.iter().collect();
            by_age.sort_by_key(|(_, t)| **t);
            by_age.into_iter().take(evict_count).map(|(id, _)| id.clone()).collect()
        };

        for id in &victims {
            sessions.remove(id);
            self.access.lock().remove(id);
        }
        tracing::debug!(evicted = victims.len(), "short-term sessions evicted");
    }

    fn sweep(&self) {
        {
            let mut sessions = self.sessions.write();
            self.enforce_limit(&mut sessions, 0);
        }
        let sessions: Vec<Arc<SessionStore>> =
            self.sessions.read().values().cloned().collect();
        let mut pruned = 0;
        for store in sessions {
            pruned += store.prune_expired();
        }
        if pruned > 0 {
            tracing::debug!(pruned, "expired short-term entries swept");
        }
    }
}

/// Owns all live session stores and the background sweep task.
pub struct ShortTermManager {
    inner: Arc<ManagerInner>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ShortTermManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                sessions: RwLock::new(HashMap::new()),
                access: Mutex::new(HashMap::new()),
                max_sessions: max_sessions.max(1),
            }),
            sweeper: Mutex::new(None),
        }
    }

    /// Spawn the periodic sweep. Holds only a weak reference so the task
    /// dies with the manager rather than keeping it alive.
    pub fn start_sweeper(&self) {
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.tick().await; // immediate first tick is a no-op
            loop {
                tick.tick().await;
                match weak.upgrade() {
                    Some(inner) => inner.sweep(),
                    None => break,
                }
            }
        });
        *self.sweeper.lock() = Some(handle);
    }

    /// Fetch (creating on first touch) the store for a session and mark
    /// it most-recently used.
    pub fn session(&self, session_id: &str) -> Arc<SessionStore> {
        self.inner.access.lock().insert(session_id.to_string(), Instant::now());

        if let Some(store) = self.inner.sessions.read().get(session_id) {
            return store.clone();
        }

        let mut sessions = self.inner.sessions.write();
        if !sessions.contains_key(session_id) {
            self.inner.enforce_limit(&mut sessions, 1);
        }
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionStore::default()))
            .clone()
    }

    /// Drop one session explicitly.
    pub fn destroy_session(&self, session_id: &str) -> bool {
        self.inner.access.lock().remove(session_id);
        self.inner.sessions.write().remove(session_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.read().len()
    }

    /// Stop the sweeper and drop every session.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.inner.sessions.write().clear();
        self.inner.access.lock().clear();
        tracing::info!("short-term memory manager shut down");
    }
}

impl Drop for ShortTermManager {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
