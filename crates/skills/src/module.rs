//! Handler modules backing local skills.
//!
//! A manifest declares actions; a [`SkillModule`] supplies the code. The
//! binding mirrors a two-level export lookup: an action binds to the
//! handler registered under its own name, then to an entry in the module's
//! default table, and otherwise to a placeholder that always fails.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use maestro_domain::error::{Error, Result};
use maestro_domain::tool::ToolContext;

/// An action handler: `(context, params) -> result | error`.
pub type Handler = Arc<dyn Fn(ToolContext, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Module lifecycle hook (`init` / `destroy`).
pub type LifecycleHook = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |ctx, params| Box::pin(f(ctx, params)))
}

/// Implementation module for one skill.
#[derive(Clone, Default)]
pub struct SkillModule {
    /// Handlers keyed by action name.
    pub exports: HashMap<String, Handler>,
    /// Fallback handler table consulted when no named export matches.
    pub default_export: HashMap<String, Handler>,
    pub init: Option<LifecycleHook>,
    pub destroy: Option<LifecycleHook>,
}

impl SkillModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export(mut self, action: impl Into<String>, h: Handler) -> Self {
        self.exports.insert(action.into(), h);
        self
    }

    pub fn default_entry(mut self, action: impl Into<String>, h: Handler) -> Self {
        self.default_export.insert(action.into(), h);
        self
    }

    pub fn on_init<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.init = Some(Arc::new(move || Box::pin(f())));
        self
    }

    pub fn on_destroy<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.destroy = Some(Arc::new(move || Box::pin(f())));
        self
    }

    /// Bind one action: named export, then default table, then the
    /// always-failing placeholder.
    pub fn bind(&self, skill_name: &str, action: &str) -> Handler {
        if let Some(h) = self.exports.get(action) {
            return h.clone();
        }
        if let Some(h) = self.default_export.get(action) {
            return h.clone();
        }
        placeholder(skill_name, action)
    }
}

/// Handler bound when a declared action has no implementation.
pub fn placeholder(skill_name: &str, action: &str) -> Handler {
    let label = format!("{skill_name}.{action}");
    Arc::new(move |_ctx, _params| {
        let label = label.clone();
        Box::pin(async move {
            Err(Error::ToolExecution(format!("action {label} has no implementation")))
        })
    })
}

/// Resolves the implementation module for a skill directory.
///
/// The runtime ships [`StaticModuleResolver`] (handlers registered in
/// process); embedding applications may resolve modules however they like.
pub trait ModuleResolver: Send + Sync {
    fn resolve(&self, skill_name: &str, skill_dir: &Path) -> Option<SkillModule>;
}

/// Module table keyed by skill name.
#[derive(Default)]
pub struct StaticModuleResolver {
    modules: HashMap<String, SkillModule>,
}

impl StaticModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, skill_name: impl Into<String>, module: SkillModule) -> Self {
        self.modules.insert(skill_name.into(), module);
        self
    }
}

impl ModuleResolver for StaticModuleResolver {
    fn resolve(&self, skill_name: &str, _skill_dir: &Path) -> Option<SkillModule> {
        self.modules.get(skill_name).cloned()
    }
}
