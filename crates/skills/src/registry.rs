//! The skill registry: owns all sources, aggregates their descriptors,
//! and routes invocations.
//!
//! The source list is guarded by an async RwLock held across the whole
//! registration sequence, so a replaced source is fully destroyed before
//! its successor becomes visible and readers never observe a half-installed
//! source. Tool-name routing is cached and invalidated on any register or
//! unregister.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use maestro_domain::error::{Error, Result};
use maestro_domain::tool::{ToolContext, ToolDefinition};

use crate::source::SkillSource;

#[derive(Default)]
pub struct SkillRegistry {
    sources: tokio::sync::RwLock<Vec<Arc<dyn SkillSource>>>,
    /// tool name -> source name; rebuilt lazily, cleared on any mutation.
    route_cache: parking_lot::RwLock<HashMap<String, String>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a source: destroy any same-named predecessor, initialize
    /// the newcomer, and only then make it visible to lookups. An
    /// initialization failure propagates and leaves the source uninstalled.
    pub async fn register_source(&self, source: Arc<dyn SkillSource>) -> Result<()> {
        let mut sources = self.sources.write().await;

        if let Some(pos) = sources.iter().position(|s| s.name() == source.name()) {
            let old = sources.remove(pos);
            tracing::info!(source = %old.name(), "destroying replaced skill source");
            old.destroy().await;
        }

        source.initialize().await?;
        tracing::info!(source = %source.name(), "skill source registered");
        sources.push(source);
        self.route_cache.write().clear();
        Ok(())
    }

    /// Remove and destroy a source. Returns whether one existed.
    pub async fn unregister_source(&self, name: &str) -> bool {
        let mut sources = self.sources.write().await;
        let Some(pos) = sources.iter().position(|s| s.name() == name) else {
            return false;
        };
        let source = sources.remove(pos);
        drop(sources);

        source.destroy().await;
        self.route_cache.write().clear();
        tracing::info!(source = %name, "skill source unregistered");
        true
    }

    /// Union of every source's advertised tools. A failing source logs a
    /// warning and contributes nothing to this call.
    pub async fn tool_descriptors(&self) -> Vec<ToolDefinition> {
        let sources = self.sources.read().await;
        let mut out = Vec::new();
        for source in sources.iter() {
            match source.tools().await {
                Ok(tools) => out.extend(tools),
                Err(e) => {
                    tracing::warn!(
                        source = %source.name(),
                        error = %e,
                        "skill source failed to list tools"
                    );
                }
            }
        }
        out
    }

    /// Case-insensitive substring search over tool name and description.
    pub async fn search_tools(&self, query: &str) -> Vec<ToolDefinition> {
        let needle = query.to_lowercase();
        self.tool_descriptors()
            .await
            .into_iter()
            .filter(|t| {
                t.name.to_lowercase().contains(&needle)
                    || t.description.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Locate the source currently advertising `tool_name` and execute.
    ///
    /// Most recently registered sources win name collisions, so the scan
    /// runs in reverse registration order.
    pub async fn execute_action(
        &self,
        tool_name: &str,
        params: Value,
        ctx: &ToolContext,
    ) -> Result<Value> {
        // Fast path through the route cache.
        let cached = self.route_cache.read().get(tool_name).cloned();
        if let Some(source_name) = cached {
            let source = {
                let sources = self.sources.read().await;
                sources.iter().find(|s| s.name() == source_name).cloned()
            };
            if let Some(source) = source {
                return source.execute(tool_name, params, ctx).await;
            }
            // Stale entry; fall through to a full scan.
            self.route_cache.write().remove(tool_name);
        }

        let source = {
            let sources = self.sources.read().await;
            let mut found = None;
            for source in sources.iter().rev() {
                let advertises = match source.tools().await {
                    Ok(tools) => tools.iter().any(|t| t.name == tool_name),
                    Err(_) => false,
                };
                if advertises {
                    found = Some(source.clone());
                    break;
                }
            }
            found
        }
        .ok_or_else(|| Error::ToolNotFound(tool_name.to_string()))?;

        self.route_cache
            .write()
            .insert(tool_name.to_string(), source.name().to_string());
        source.execute(tool_name, params, ctx).await
    }

    pub async fn source_names(&self) -> Vec<String> {
        self.sources.read().await.iter().map(|s| s.name().to_string()).collect()
    }

    pub async fn source_count(&self) -> usize {
        self.sources.read().await.len()
    }

    /// Destroy every source and clear the registry.
    pub async fn shutdown(&self) {
        let sources: Vec<Arc<dyn SkillSource>> =
            self.sources.write().await.drain(..).collect();
        for source in sources {
            source.destroy().await;
        }
        self.route_cache.write().clear();
        tracing::info!("skill registry shut down");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Configurable stub source for registry behavior tests.
    struct StubSource {
        name: String,
        tool_names: Vec<String>,
        init_fails: bool,
        tools_fail: bool,
        destroyed: Arc<AtomicBool>,
        executions: Arc<AtomicUsize>,
    }

    impl StubSource {
        fn new(name: &str, tools: &[&str]) -> Self {
            Self {
                name: name.into(),
                tool_names: tools.iter().map(|s| s.to_string()).collect(),
                init_fails: false,
                tools_fail: false,
                destroyed: Arc::new(AtomicBool::new(false)),
                executions: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl SkillSource for StubSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Local
        }

        async fn initialize(&self) -> Result<()> {
            if self.init_fails {
                return Err(Error::Config("init refused".into()));
            }
            Ok(())
        }

        async fn tools(&self) -> Result<Vec<ToolDefinition>> {
            if self.tools_fail {
                return Err(Error::NotConnected(self.name.clone()));
            }
            Ok(self
                .tool_names
                .iter()
                .map(|n| ToolDefinition {
                    name: n.clone(),
                    description: format!("{n} does things"),
                    parameters: serde_json::json!({"type": "object", "properties": {}}),
                })
                .collect())
        }

        async fn execute(&self, tool_name: &str, _params: Value, _ctx: &ToolContext) -> Result<Value> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            Ok(Value::String(format!("{}:{tool_name}", self.name)))
        }

        async fn destroy(&self) {
            self.destroyed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn register_and_list() {
        let registry = SkillRegistry::new();
        registry.register_source(Arc::new(StubSource::new("a", &["a.one"]))).await.unwrap();
        registry.register_source(Arc::new(StubSource::new("b", &["b.two"]))).await.unwrap();

        let tools = registry.tool_descriptors().await;
        assert_eq!(tools.len(), 2);
        assert_eq!(registry.source_count().await, 2);
    }

    #[tokio::test]
    async fn same_name_replaces_and_destroys_old() {
        let registry = SkillRegistry::new();
        let old = Arc::new(StubSource::new("dup", &["dup.old"]));
        let old_destroyed = old.destroyed.clone();
        registry.register_source(old).await.unwrap();

        registry.register_source(Arc::new(StubSource::new("dup", &["dup.new"]))).await.unwrap();

        assert!(old_destroyed.load(Ordering::SeqCst));
        assert_eq!(registry.source_count().await, 1);
        let names: Vec<String> =
            registry.tool_descriptors().await.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["dup.new"]);
    }

    #[tokio::test]
    async fn failed_initialize_is_not_installed() {
        let registry = SkillRegistry::new();
        let mut bad = StubSource::new("bad", &["bad.x"]);
        bad.init_fails = true;
        assert!(registry.register_source(Arc::new(bad)).await.is_err());
        assert_eq!(registry.source_count().await, 0);
    }

    #[tokio::test]
    async fn failing_source_contributes_nothing() {
        let registry = SkillRegistry::new();
        registry.register_source(Arc::new(StubSource::new("ok", &["ok.t"]))).await.unwrap();
        let mut flaky = StubSource::new("flaky", &["flaky.t"]);
        flaky.tools_fail = true;
        registry.register_source(Arc::new(flaky)).await.unwrap();

        let names: Vec<String> =
            registry.tool_descriptors().await.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["ok.t"]);
    }

    #[tokio::test]
    async fn execute_routes_and_caches() {
        let registry = SkillRegistry::new();
        let source = Arc::new(StubSource::new("a", &["a.go"]));
        let executions = source.executions.clone();
        registry.register_source(source).await.unwrap();

        let out = registry
            .execute_action("a.go", Value::Null, &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out, Value::String("a:a.go".into()));
        assert!(registry.route_cache.read().contains_key("a.go"));

        registry.execute_action("a.go", Value::Null, &ToolContext::default()).await.unwrap();
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_tool_fails_not_found() {
        let registry = SkillRegistry::new();
        let err = registry
            .execute_action("ghost.tool", Value::Null, &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn unregister_invalidates_cache() {
        let registry = SkillRegistry::new();
        registry.register_source(Arc::new(StubSource::new("a", &["a.go"]))).await.unwrap();
        registry.execute_action("a.go", Value::Null, &ToolContext::default()).await.unwrap();

        assert!(registry.unregister_source("a").await);
        assert!(registry.route_cache.read().is_empty());
        assert!(registry
            .execute_action("a.go", Value::Null, &ToolContext::default())
            .await
            .is_err());
        assert!(!registry.unregister_source("a").await);
    }

    #[tokio::test]
    async fn collision_routes_to_most_recent_source() {
        let registry = SkillRegistry::new();
        registry.register_source(Arc::new(StubSource::new("first", &["shared.t"]))).await.unwrap();
        registry.register_source(Arc::new(StubSource::new("second", &["shared.t"]))).await.unwrap();

        let out = registry
            .execute_action("shared.t", Value::Null, &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out, Value::String("second:shared.t".into()));
    }

    #[tokio::test]
    async fn search_is_case_insensitive_over_name_and_description() {
        let registry = SkillRegistry::new();
        registry
            .register_source(Arc::new(StubSource::new("a", &["Files.List", "other.tool"])))
            .await
            .unwrap();

        let by_name = registry.search_tools("files").await;
        assert_eq!(by_name.len(), 1);
        let by_desc = registry.search_tools("DOES THINGS").await;
        assert_eq!(by_desc.len(), 2);
    }

    #[tokio::test]
    async fn shutdown_destroys_everything() {
        let registry = SkillRegistry::new();
        let source = Arc::new(StubSource::new("a", &["a.t"]));
        let destroyed = source.destroyed.clone();
        registry.register_source(source).await.unwrap();

        registry.shutdown().await;
        assert!(destroyed.load(Ordering::SeqCst));
        assert_eq!(registry.source_count().await, 0);
    }
}
