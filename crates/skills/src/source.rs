use async_trait::async_trait;
use serde_json::Value;

use maestro_domain::error::Result;
use maestro_domain::tool::{ToolContext, ToolDefinition};

/// Kind tag for a skill source. The polymorphism is closed (only these
/// two kinds are planned) but dispatch stays behind the trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Local,
    Remote,
}

/// A provider of tool descriptors and an executor for them.
///
/// Sources are owned by the [`crate::SkillRegistry`]; `initialize` runs
/// during registration and `destroy` when the source is replaced or the
/// registry shuts down. Implementations must tolerate `destroy` without a
/// prior successful `initialize`.
#[async_trait]
pub trait SkillSource: Send + Sync {
    /// Globally unique source name; collisions replace the older source.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    async fn initialize(&self) -> Result<()>;

    /// Currently advertised tools. A disconnected remote source advertises
    /// nothing rather than erroring.
    async fn tools(&self) -> Result<Vec<ToolDefinition>>;

    /// Execute one advertised tool.
    async fn execute(&self, tool_name: &str, params: Value, ctx: &ToolContext) -> Result<Value>;

    async fn destroy(&self);
}
