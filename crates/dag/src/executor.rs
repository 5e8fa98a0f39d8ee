//! Round-based DAG execution.
//!
//! Each round lists the ready tasks, flips them to running, dispatches
//! them all in parallel, and only after every dispatch has settled emits
//! one completion event per task and persists its terminal status. The
//! next round may pick up tasks freed by this one; a run ends when no
//! tasks are ready or the round bound is hit.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use maestro_domain::error::Result;
use maestro_domain::event::ExecutionEvent;
use maestro_domain::tool::ToolContext;
use maestro_skills::SkillRegistry;

use crate::repo::TaskRepo;
use crate::task::{Task, TaskStatus};

/// Upper bound on rounds per run; a graph needing more is almost
/// certainly mis-built.
pub const MAX_ROUNDS: usize = 50;

pub struct DagExecutor {
    repo: Arc<dyn TaskRepo>,
    registry: Arc<SkillRegistry>,
}

impl DagExecutor {
    pub fn new(repo: Arc<dyn TaskRepo>, registry: Arc<SkillRegistry>) -> Self {
        Self { repo, registry }
    }

    pub fn repo(&self) -> &Arc<dyn TaskRepo> {
        &self.repo
    }

    /// Run every ready wave for a session, yielding task events lazily.
    /// The producer closes the channel when the run ends.
    pub fn execute(self: Arc<Self>, session_id: &str) -> mpsc::Receiver<ExecutionEvent> {
        let (tx, rx) = mpsc::channel::<ExecutionEvent>(64);
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            if let Err(e) = self.run_rounds(&session_id, &tx).await {
                tracing::error!(session = %session_id, error = %e, "DAG run aborted");
                let _ = tx.send(ExecutionEvent::Error { message: e.to_string() }).await;
            }
        });

        rx
    }

    async fn run_rounds(
        &self,
        session_id: &str,
        tx: &mpsc::Sender<ExecutionEvent>,
    ) -> Result<()> {
        for round in 0..MAX_ROUNDS {
            let ready = self.repo.get_ready_tasks(session_id).await?;
            if ready.is_empty() {
                tracing::debug!(session = %session_id, rounds = round, "DAG run complete");
                return Ok(());
            }

            tracing::debug!(
                session = %session_id,
                round,
                tasks = ready.len(),
                "dispatching DAG round"
            );

            for task in &ready {
                self.repo.update_status(&task.id, TaskStatus::Running, None).await?;
            }

            // Fan out, then join: no task of the next round starts until
            // every dispatch in this one has settled.
            let outcomes = futures_util::future::join_all(
                ready.iter().map(|task| self.dispatch(task)),
            )
            .await;

            for (task, outcome) in ready.iter().zip(outcomes) {
                match outcome {
                    Ok(result) => {
                        self.repo
                            .update_status(&task.id, TaskStatus::Completed, Some(result.clone()))
                            .await?;
                        let _ = tx
                            .send(ExecutionEvent::TaskCompleted {
                                task_id: task.id.clone(),
                                result,
                            })
                            .await;
                    }
                    Err(e) => {
                        let message = e.to_string();
                        self.repo
                            .update_status(&task.id, TaskStatus::Failed, Some(message.clone()))
                            .await?;
                        let _ = tx
                            .send(ExecutionEvent::TaskFailed {
                                task_id: task.id.clone(),
                                error: message,
                            })
                            .await;
                    }
                }
            }
        }

        tracing::warn!(
            session = %session_id,
            max_rounds = MAX_ROUNDS,
            "DAG run hit the round bound; remaining tasks stay pending"
        );
        Ok(())
    }

    /// Run one task: a JSON `{tool, params}` description dispatches
    /// through the registry, anything else is acknowledged verbatim.
    async fn dispatch(&self, task: &Task) -> Result<String> {
        match parse_tool_description(&task.description) {
            Some((tool, params)) => {
                let ctx = ToolContext {
                    session_id: task.session_id.clone(),
                    user_id: None,
                };
                let value = self.registry.execute_action(&tool, params, &ctx).await?;
                Ok(stringify_result(value))
            }
            None => Ok(format!("Task noted: {}", task.description)),
        }
    }
}

/// Accept only `{"tool": <string>, "params": <object>}` descriptions.
fn parse_tool_description(description: &str) -> Option<(String, Value)> {
    let v: Value = serde_json::from_str(description.trim()).ok()?;
    let tool = v.get("tool")?.as_str()?.to_string();
    let params = v.get("params")?.clone();
    if !params.is_object() {
        return None;
    }
    Some((tool, params))
}

fn stringify_result(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::InMemoryTaskRepo;
    use async_trait::async_trait;
    use maestro_domain::error::Error;
    use maestro_domain::tool::ToolDefinition;
    use maestro_skills::source::{SkillSource, SourceKind};

    struct EchoSource;

    #[async_trait]
    impl SkillSource for EchoSource {
        fn name(&self) -> &str {
            "echo"
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Local
        }

        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn tools(&self) -> Result<Vec<ToolDefinition>> {
            Ok(vec![
                ToolDefinition {
                    name: "echo.say".into(),
                    description: "echoes".into(),
                    parameters: serde_json::json!({"type": "object", "properties": {}}),
                },
                ToolDefinition {
                    name: "echo.fail".into(),
                    description: "always errors".into(),
                    parameters: serde_json::json!({"type": "object", "properties": {}}),
                },
            ])
        }

        async fn execute(&self, tool_name: &str, params: Value, _ctx: &ToolContext) -> Result<Value> {
            match tool_name {
                "echo.say" => Ok(Value::String(format!(
                    "said {}",
                    params.get("text").and_then(|v| v.as_str()).unwrap_or("")
                ))),
                _ => Err(Error::ToolExecution("echo.fail refused".into())),
            }
        }

        async fn destroy(&self) {}
    }

    async fn executor() -> (Arc<DagExecutor>, Arc<InMemoryTaskRepo>) {
        let repo = Arc::new(InMemoryTaskRepo::new());
        let registry = Arc::new(SkillRegistry::new());
        registry.register_source(Arc::new(EchoSource)).await.unwrap();
        (Arc::new(DagExecutor::new(repo.clone(), registry)), repo)
    }

    async fn drain(mut rx: mpsc::Receiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn diamond_resolves_in_three_rounds() {
        let (exec, repo) = executor().await;
        let a = repo.create_task("s1", "step a", vec![]).await.unwrap();
        let b = repo.create_task("s1", "step b", vec![a.id.clone()]).await.unwrap();
        let c = repo.create_task("s1", "step c", vec![a.id.clone()]).await.unwrap();
        let d = repo
            .create_task("s1", "step d", vec![b.id.clone(), c.id.clone()])
            .await
            .unwrap();

        let events = drain(exec.execute("s1")).await;
        let order: Vec<String> = events
            .iter()
            .map(|e| match e {
                ExecutionEvent::TaskCompleted { task_id, .. } => task_id.clone(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();

        assert_eq!(order.len(), 4);
        assert_eq!(order[0], a.id);
        assert_eq!(order[3], d.id);
        // B and C settle between A and D in either order.
        assert!(order[1..3].contains(&b.id));
        assert!(order[1..3].contains(&c.id));

        let dag = repo.get_dag("s1").await.unwrap();
        assert!(dag.tasks.iter().all(|t| t.status == TaskStatus::Completed));
    }

    #[tokio::test]
    async fn freeform_descriptions_are_noted() {
        let (exec, repo) = executor().await;
        repo.create_task("s1", "investigate the logs", vec![]).await.unwrap();

        let events = drain(exec.execute("s1")).await;
        match &events[0] {
            ExecutionEvent::TaskCompleted { result, .. } => {
                assert_eq!(result, "Task noted: investigate the logs");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_descriptions_dispatch_through_registry() {
        let (exec, repo) = executor().await;
        repo.create_task("s1", r#"{"tool": "echo.say", "params": {"text": "hi"}}"#, vec![])
            .await
            .unwrap();

        let events = drain(exec.execute("s1")).await;
        match &events[0] {
            ExecutionEvent::TaskCompleted { result, .. } => assert_eq!(result, "said hi"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_task_blocks_dependents_but_not_siblings() {
        let (exec, repo) = executor().await;
        let bad = repo
            .create_task("s1", r#"{"tool": "echo.fail", "params": {}}"#, vec![])
            .await
            .unwrap();
        let sibling = repo.create_task("s1", "independent", vec![]).await.unwrap();
        let dependent = repo
            .create_task("s1", "never runs", vec![bad.id.clone()])
            .await
            .unwrap();

        let events = drain(exec.execute("s1")).await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| matches!(
            e,
            ExecutionEvent::TaskFailed { task_id, .. } if *task_id == bad.id
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ExecutionEvent::TaskCompleted { task_id, .. } if *task_id == sibling.id
        )));

        let stuck = repo.get_task(&dependent.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, TaskStatus::Pending);
        let failed = repo.get_task(&bad.id).await.unwrap().unwrap();
        assert!(failed.result.unwrap().contains("echo.fail refused"));
    }

    #[tokio::test]
    async fn round_bound_leaves_tail_pending() {
        let (exec, repo) = executor().await;
        let mut prev: Option<String> = None;
        let mut ids = Vec::new();
        for i in 0..(MAX_ROUNDS + 5) {
            let deps = prev.map(|p| vec![p]).unwrap_or_default();
            let t = repo.create_task("s1", &format!("link {i}"), deps).await.unwrap();
            prev = Some(t.id.clone());
            ids.push(t.id);
        }

        let events = drain(exec.execute("s1")).await;
        assert_eq!(events.len(), MAX_ROUNDS);

        let last = repo.get_task(ids.last().unwrap()).await.unwrap().unwrap();
        assert_eq!(last.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn empty_session_terminates_immediately() {
        let (exec, _repo) = executor().await;
        let events = drain(exec.execute("empty")).await;
        assert!(events.is_empty());
    }

    #[test]
    fn tool_description_parsing() {
        assert!(parse_tool_description("plain words").is_none());
        assert!(parse_tool_description(r#"{"tool": "t"}"#).is_none());
        assert!(parse_tool_description(r#"{"tool": "t", "params": []}"#).is_none());
        let (tool, params) =
            parse_tool_description(r#"{"tool": "a.b", "params": {"x": 1}}"#).unwrap();
        assert_eq!(tool, "a.b");
        assert_eq!(params["x"], 1);
    }
}
