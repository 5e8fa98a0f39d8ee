//! Built-in tools handled inline by the agent loop.
//!
//! `plan_task` is always advertised; the memory pair appears when
//! long-term memory is configured and the DAG trio when the executor is
//! enabled. Argument structs stay lenient; a model that omits an
//! optional field should not crash the turn.

use serde::Deserialize;
use serde_json::Value;

use maestro_domain::tool::ToolDefinition;

pub const PLAN_TASK: &str = "plan_task";
pub const MEMORY_REMEMBER: &str = "memory_remember";
pub const MEMORY_RECALL: &str = "memory_recall";
pub const DAG_CREATE_TASK: &str = "dag_create_task";
pub const DAG_GET_STATUS: &str = "dag_get_status";
pub const DAG_EXECUTE: &str = "dag_execute";

pub fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        PLAN_TASK | MEMORY_REMEMBER | MEMORY_RECALL | DAG_CREATE_TASK | DAG_GET_STATUS
            | DAG_EXECUTE
    )
}

// ── Argument shapes ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PlanArgs {
    #[serde(default)]
    pub thought: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RememberArgs {
    pub content: String,
    #[serde(default)]
    pub tags: Option<String>,
}

impl RememberArgs {
    /// Comma-separated tags, trimmed, empties dropped.
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct RecallArgs {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskArgs {
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

// ── Descriptors ────────────────────────────────────────────────────

fn tool(name: &str, description: &str, parameters: Value) -> ToolDefinition {
    ToolDefinition { name: name.into(), description: description.into(), parameters }
}

/// The built-in descriptors advertised for one run.
pub fn builtin_tools(memory_enabled: bool, dag_enabled: bool) -> Vec<ToolDefinition> {
    let mut tools = vec![tool(
        PLAN_TASK,
        "Think through a request and lay out an ordered plan before acting.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "thought": {"type": "string", "description": "Your reasoning about the request"},
                "steps": {"type": "array", "items": {"type": "string"}, "description": "Ordered plan steps"}
            },
            "required": ["thought", "steps"]
        }),
    )];

    if memory_enabled {
        tools.push(tool(
            MEMORY_REMEMBER,
            "Save an important fact to long-term memory.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string", "description": "The fact to remember"},
                    "tags": {"type": "string", "description": "Comma-separated tags"}
                },
                "required": ["content"]
            }),
        ));
        tools.push(tool(
            MEMORY_RECALL,
            "Search long-term memory for relevant facts.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "What to look for"},
                    "limit": {"type": "number", "description": "Maximum results"}
                },
                "required": ["query"]
            }),
        ));
    }

    if dag_enabled {
        tools.push(tool(
            DAG_CREATE_TASK,
            "Persist a task in the session's task graph. The description may \
             be free-form text or a JSON object {\"tool\", \"params\"}.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "description": {"type": "string", "description": "What the task should do"},
                    "dependencies": {"type": "array", "items": {"type": "string"}, "description": "Ids of tasks that must complete first"}
                },
                "required": ["description"]
            }),
        ));
        tools.push(tool(
            DAG_GET_STATUS,
            "Inspect the session's task graph: tasks, statuses, and edges.",
            serde_json::json!({"type": "object", "properties": {}}),
        ));
        tools.push(tool(
            DAG_EXECUTE,
            "Execute every ready task in the session's graph, in dependency order.",
            serde_json::json!({"type": "object", "properties": {}}),
        ));
    }

    tools
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_task_is_always_advertised() {
        let names: Vec<String> =
            builtin_tools(false, false).into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec![PLAN_TASK]);
    }

    #[test]
    fn memory_and_dag_tools_are_conditional() {
        let names: Vec<String> =
            builtin_tools(true, true).into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![PLAN_TASK, MEMORY_REMEMBER, MEMORY_RECALL, DAG_CREATE_TASK, DAG_GET_STATUS, DAG_EXECUTE]
        );
    }

    #[test]
    fn tag_list_splits_and_trims() {
        let args = RememberArgs { content: "x".into(), tags: Some(" a, b ,, c ".into()) };
        assert_eq!(args.tag_list(), vec!["a", "b", "c"]);

        let none = RememberArgs { content: "x".into(), tags: None };
        assert!(none.tag_list().is_empty());
    }

    #[test]
    fn builtin_names_are_recognized() {
        assert!(is_builtin("plan_task"));
        assert!(is_builtin("dag_execute"));
        assert!(!is_builtin("file-manager.list_directory"));
    }

    #[test]
    fn lenient_plan_args() {
        let args: PlanArgs = serde_json::from_str("{}").unwrap();
        assert!(args.thought.is_empty());
        assert!(args.steps.is_empty());
    }
}
