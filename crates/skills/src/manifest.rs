//! SKILL.md manifest parsing.
//!
//! A manifest is a YAML frontmatter header plus a Markdown body:
//!
//! ```markdown
//! ---
//! name: file-manager
//! version: 1.2.0
//! description: Filesystem helpers
//! ---
//!
//! ## Actions
//!
//! ### list_directory
//! List the contents of a directory.
//! - **参数**: `path` (string) - directory to list
//! - `depth` (number) - recursion depth, 可选
//! ```
//!
//! Parameter bullets accept both the `**参数**:` prefixed and the bare
//! backtick form. A parameter is required unless its description carries
//! the "可选" marker.

use serde::Deserialize;

use crate::types::{ActionParam, SkillAction, SkillMeta};

/// Marker flagging a parameter optional.
const OPTIONAL_MARKER: &str = "可选";
/// Bullet prefix of the localized parameter form.
const PARAM_PREFIX: &str = "**参数**:";

/// Raw frontmatter fields; defaults are applied by [`parse_manifest`].
#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Parse a full SKILL.md. `fallback_name` (the skill directory name) is
/// used when the header omits `name`.
pub fn parse_manifest(content: &str, fallback_name: &str) -> (SkillMeta, Vec<SkillAction>) {
    let (front, body) = split_frontmatter(content);

    let header: Frontmatter = front
        .and_then(|yaml| match serde_yaml::from_str(yaml) {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::warn!(skill = %fallback_name, error = %e, "invalid SKILL.md frontmatter");
                None
            }
        })
        .unwrap_or_default();

    let meta = SkillMeta {
        name: header.name.unwrap_or_else(|| fallback_name.to_string()),
        version: header.version.unwrap_or_else(|| "1.0.0".to_string()),
        description: header.description.unwrap_or_default(),
        author: header.author,
        dependencies: header.dependencies,
    };

    if meta.description.is_empty() {
        tracing::debug!(skill = %meta.name, "manifest has no description");
    }

    let actions = parse_actions(body);
    (meta, actions)
}

/// Split `---`-delimited frontmatter from the body. Returns
/// `(Some(yaml), body)` or `(None, whole_content)`.
fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let trimmed = content.trim_start();
    let Some(after_open) = trimmed.strip_prefix("---") else {
        return (None, content);
    };
    match after_open.find("\n---") {
        Some(close) => {
            let yaml = &after_open[..close];
            let body = after_open[close + 4..].trim_start_matches('\n');
            (Some(yaml), body)
        }
        None => (None, content),
    }
}

/// Extract `### <action>` blocks under the `## Actions` heading.
fn parse_actions(body: &str) -> Vec<SkillAction> {
    let mut actions = Vec::new();

    let mut in_actions_section = false;
    let mut current: Option<SkillAction> = None;

    for line in body.lines() {
        let trimmed = line.trim();

        if let Some(heading) = trimmed.strip_prefix("## ") {
            if let Some(action) = current.take() {
                actions.push(action);
            }
            in_actions_section = heading.trim().eq_ignore_ascii_case("actions");
            continue;
        }

        if !in_actions_section {
            continue;
        }

        if let Some(name) = trimmed.strip_prefix("### ") {
            if let Some(action) = current.take() {
                actions.push(action);
            }
            current = Some(SkillAction {
                name: name.trim().to_string(),
                description: String::new(),
                params: Vec::new(),
            });
            continue;
        }

        let Some(action) = current.as_mut() else { continue };

        if let Some(bullet) = trimmed.strip_prefix("- ") {
            if let Some(param) = parse_param_bullet(bullet) {
                action.params.push(param);
            }
            continue;
        }

        // First non-bullet, non-empty line is the action description.
        if action.description.is_empty() && !trimmed.is_empty() {
            action.description = trimmed.to_string();
        }
    }

    if let Some(action) = current.take() {
        actions.push(action);
    }

    actions
}

/// Parse one parameter bullet (after the leading `- `), in either form:
/// `` **参数**: `name` (type) - description `` or
/// `` `name` (type) - description ``.
fn parse_param_bullet(bullet: &str) -> Option<ActionParam> {
    let rest = bullet.trim();
    let rest = rest.strip_prefix(PARAM_PREFIX).map(str::trim).unwrap_or(rest);

    // `name`
    let rest = rest.strip_prefix('`')?;
    let close = rest.find('`')?;
    let name = rest[..close].trim().to_string();
    if name.is_empty() {
        return None;
    }
    let rest = rest[close + 1..].trim_start();

    // (type)
    let rest = rest.strip_prefix('(')?;
    let close = rest.find(')')?;
    let ty = rest[..close].trim().to_string();
    let rest = rest[close + 1..].trim_start();

    // - description
    let description = rest.strip_prefix('-').map(str::trim).unwrap_or(rest).to_string();
    let required = !description.contains(OPTIONAL_MARKER);

    Some(ActionParam { name, ty, description, required })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
