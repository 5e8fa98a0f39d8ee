//! Skill system: tool descriptors aggregated from heterogeneous sources.
//!
//! A [`source::SkillSource`] is anything that can advertise tools and
//! execute them: the [`local::LocalSkillSource`] loads SKILL.md manifests
//! from disk, the remote MCP source lives in `maestro-mcp-client`. The
//! [`registry::SkillRegistry`] owns the sources and routes invocations.

pub mod local;
pub mod manifest;
pub mod module;
pub mod registry;
pub mod source;
pub mod types;

pub use local::LocalSkillSource;
pub use module::{Handler, ModuleResolver, SkillModule, StaticModuleResolver};
pub use registry::SkillRegistry;
pub use source::{SkillSource, SourceKind};
pub use types::{ActionParam, Skill, SkillAction, SkillMeta};
