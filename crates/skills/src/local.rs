//! Local filesystem skill source.
//!
//! Scans configured directories for `<skill>/SKILL.md`, parses each
//! manifest, and binds declared actions to handlers resolved through the
//! injected [`ModuleResolver`]. Advertised tool names are
//! `<skill-name>.<action>`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use maestro_domain::error::{Error, Result};
use maestro_domain::tool::{ToolContext, ToolDefinition};

use crate::manifest;
use crate::module::{Handler, LifecycleHook, ModuleResolver};
use crate::source::{SkillSource, SourceKind};
use crate::types::Skill;

struct LoadedSkill {
    skill: Skill,
    handlers: HashMap<String, Handler>,
    destroy: Option<LifecycleHook>,
}

pub struct LocalSkillSource {
    name: String,
    skill_dirs: Vec<PathBuf>,
    resolver: Arc<dyn ModuleResolver>,
    skills: RwLock<Vec<Arc<LoadedSkill>>>,
}

impl LocalSkillSource {
    pub fn new(
        name: impl Into<String>,
        skill_dirs: Vec<PathBuf>,
        resolver: Arc<dyn ModuleResolver>,
    ) -> Self {
        Self {
            name: name.into(),
            skill_dirs,
            resolver,
            skills: RwLock::new(Vec::new()),
        }
    }

    /// Load one skill directory: parse the manifest, resolve the module,
    /// run its init hook, and bind every declared action.
    async fn load_skill_dir(&self, dir: &PathBuf) -> Result<Option<LoadedSkill>> {
        let manifest_path = dir.join("SKILL.md");
        if !manifest_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&manifest_path)?;
        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let (meta, actions) = manifest::parse_manifest(&content, &dir_name);

        if actions.is_empty() {
            tracing::warn!(skill = %meta.name, "manifest declares no actions, skipping");
            return Ok(None);
        }

        let module = self.resolver.resolve(&meta.name, dir).unwrap_or_default();

        if let Some(init) = &module.init {
            init().await.map_err(|e| {
                Error::Config(format!("skill {} init failed: {e}", meta.name))
            })?;
        }

        let handlers: HashMap<String, Handler> = actions
            .iter()
            .map(|a| (a.name.clone(), module.bind(&meta.name, &a.name)))
            .collect();

        tracing::info!(
            skill = %meta.name,
            version = %meta.version,
            actions = actions.len(),
            "local skill loaded"
        );

        Ok(Some(LoadedSkill {
            skill: Skill { meta, actions },
            handlers,
            destroy: module.destroy.clone(),
        }))
    }
}

#[async_trait]
impl SkillSource for LocalSkillSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    async fn initialize(&self) -> Result<()> {
        let mut loaded = Vec::new();

        for root in &self.skill_dirs {
            if !root.exists() {
                tracing::debug!(dir = %root.display(), "skill directory does not exist");
                continue;
            }
            let mut subdirs: Vec<PathBuf> = std::fs::read_dir(root)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            subdirs.sort();

            for dir in subdirs {
                match self.load_skill_dir(&dir).await {
                    Ok(Some(skill)) => loaded.push(Arc::new(skill)),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(
                            dir = %dir.display(),
                            error = %e,
                            "skipping skill directory"
                        );
                    }
                }
            }
        }

        *self.skills.write() = loaded;
        Ok(())
    }

    async fn tools(&self) -> Result<Vec<ToolDefinition>> {
        let skills = self.skills.read();
        Ok(skills
            .iter()
            .flat_map(|loaded| {
                let skill_name = loaded.skill.meta.name.clone();
                loaded.skill.actions.iter().map(move |a| ToolDefinition {
                    name: format!("{skill_name}.{}", a.name),
                    description: a.description.clone(),
                    parameters: a.parameter_schema(),
                })
            })
            .collect())
    }

    async fn execute(&self, tool_name: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
        let (skill_name, action) = tool_name
            .split_once('.')
            .ok_or_else(|| Error::ToolNotFound(tool_name.to_string()))?;

        let handler = {
            let skills = self.skills.read();
            skills
                .iter()
                .find(|l| l.skill.meta.name == skill_name)
                .and_then(|l| l.handlers.get(action))
                .cloned()
        }
        .ok_or_else(|| Error::ToolNotFound(tool_name.to_string()))?;

        handler(ctx.clone(), params).await
    }

    async fn destroy(&self) {
        let skills: Vec<Arc<LoadedSkill>> = self.skills.write().drain(..).collect();
        for loaded in skills {
            if let Some(destroy) = &loaded.destroy {
                if let Err(e) = destroy().await {
                    tracing::warn!(
                        skill = %loaded.skill.meta.name,
                        error = %e,
                        "skill destroy hook failed"
                    );
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
