use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata block of a skill manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMeta {
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// One declared parameter of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionParam {
    pub name: String,
    /// Declared type token (e.g. "string", "number"); passed through to
    /// the JSON schema untouched.
    pub ty: String,
    pub description: String,
    pub required: bool,
}

/// One callable action declared by a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillAction {
    pub name: String,
    pub description: String,
    pub params: Vec<ActionParam>,
}

impl SkillAction {
    /// Build the JSON-Schema-shaped parameter object advertised to the LLM.
    pub fn parameter_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.params {
            properties.insert(
                p.name.clone(),
                serde_json::json!({
                    "type": p.ty,
                    "description": p.description,
                }),
            );
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A parsed skill: metadata plus its declared actions.
#[derive(Debug, Clone)]
pub struct Skill {
    pub meta: SkillMeta,
    pub actions: Vec<SkillAction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_schema_separates_required_and_optional() {
        let action = SkillAction {
            name: "list_directory".into(),
            description: "List a directory".into(),
            params: vec![
                ActionParam {
                    name: "path".into(),
                    ty: "string".into(),
                    description: "directory path".into(),
                    required: true,
                },
                ActionParam {
                    name: "depth".into(),
                    ty: "number".into(),
                    description: "recursion depth, 可选".into(),
                    required: false,
                },
            ],
        };
        let schema = action.parameter_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["path"]["type"], "string");
        assert_eq!(schema["required"], serde_json::json!(["path"]));
    }
}
