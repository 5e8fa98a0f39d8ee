//! Task persistence interface and the in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use maestro_domain::error::{Error, Result};

use crate::task::{DagEdge, DagView, Task, TaskStatus};

/// Narrow persistence interface for the task graph. Readers see committed
/// state only; a SQL-backed implementation lives with the embedding
/// application.
#[async_trait]
pub trait TaskRepo: Send + Sync {
    async fn create_task(
        &self,
        session_id: &str,
        description: &str,
        dependencies: Vec<String>,
    ) -> Result<Task>;

    async fn get_task(&self, id: &str) -> Result<Option<Task>>;

    /// All tasks for a session, oldest first.
    async fn get_tasks(&self, session_id: &str) -> Result<Vec<Task>>;

    async fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<String>,
    ) -> Result<()>;

    /// Tasks that are pending with every dependency completed.
    async fn get_ready_tasks(&self, session_id: &str) -> Result<Vec<Task>>;

    /// The session's tasks plus derived `{from: dep, to: task}` edges.
    async fn get_dag(&self, session_id: &str) -> Result<DagView>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryTaskRepo {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_session_tasks(tasks: &HashMap<String, Task>, session_id: &str) -> Vec<Task> {
        let mut out: Vec<Task> = tasks
            .values()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }
}

#[async_trait]
impl TaskRepo for InMemoryTaskRepo {
    async fn create_task(
        &self,
        session_id: &str,
        description: &str,
        dependencies: Vec<String>,
    ) -> Result<Task> {
        let mut tasks = self.tasks.write();

        for dep in &dependencies {
            match tasks.get(dep) {
                Some(t) if t.session_id == session_id => {}
                Some(_) => {
                    return Err(Error::Config(format!(
                        "dependency {dep} belongs to another session"
                    )));
                }
                None => return Err(Error::Config(format!("unknown dependency {dep}"))),
            }
        }

        let task = Task::new(session_id, description, dependencies);
        tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.read().get(id).cloned())
    }

    async fn get_tasks(&self, session_id: &str) -> Result<Vec<Task>> {
        Ok(Self::sorted_session_tasks(&self.tasks.read(), session_id))
    }

    async fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<String>,
    ) -> Result<()> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| Error::Other(format!("unknown task {id}")))?;
        task.status = status;
        if result.is_some() {
            task.result = result;
        }
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn get_ready_tasks(&self, session_id: &str) -> Result<Vec<Task>> {
        let tasks = self.tasks.read();
        Ok(Self::sorted_session_tasks(&tasks, session_id)
            .into_iter()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.dependencies.iter().all(|dep| {
                        tasks
                            .get(dep)
                            .map(|d| d.status == TaskStatus::Completed)
                            .unwrap_or(false)
                    })
            })
            .collect())
    }

    async fn get_dag(&self, session_id: &str) -> Result<DagView> {
        let tasks = Self::sorted_session_tasks(&self.tasks.read(), session_id);
        let edges = tasks
            .iter()
            .flat_map(|t| {
                t.dependencies
                    .iter()
                    .map(|dep| DagEdge { from: dep.clone(), to: t.id.clone() })
            })
            .collect();
        Ok(DagView { tasks, edges })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch() {
        let repo = InMemoryTaskRepo::new();
        let task = repo.create_task("s1", "do a thing", vec![]).await.unwrap();
        let fetched = repo.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.description, "do a thing");
        assert_eq!(fetched.status, TaskStatus::Pending);
        assert!(repo.get_task("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dependencies_must_exist_in_the_same_session() {
        let repo = InMemoryTaskRepo::new();
        let a = repo.create_task("s1", "a", vec![]).await.unwrap();

        assert!(repo.create_task("s1", "b", vec![a.id.clone()]).await.is_ok());
        assert!(repo.create_task("s1", "c", vec!["ghost".into()]).await.is_err());
        assert!(repo.create_task("s2", "cross", vec![a.id]).await.is_err());
    }

    #[tokio::test]
    async fn ready_iff_pending_with_completed_deps() {
        let repo = InMemoryTaskRepo::new();
        let a = repo.create_task("s1", "a", vec![]).await.unwrap();
        let b = repo.create_task("s1", "b", vec![a.id.clone()]).await.unwrap();

        let ready: Vec<String> =
            repo.get_ready_tasks("s1").await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec![a.id.clone()]);

        repo.update_status(&a.id, TaskStatus::Running, None).await.unwrap();
        assert!(repo.get_ready_tasks("s1").await.unwrap().is_empty());

        repo.update_status(&a.id, TaskStatus::Completed, Some("done".into())).await.unwrap();
        let ready: Vec<String> =
            repo.get_ready_tasks("s1").await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec![b.id]);
    }

    #[tokio::test]
    async fn failed_dependency_blocks_dependents_forever() {
        let repo = InMemoryTaskRepo::new();
        let a = repo.create_task("s1", "a", vec![]).await.unwrap();
        let _b = repo.create_task("s1", "b", vec![a.id.clone()]).await.unwrap();

        repo.update_status(&a.id, TaskStatus::Failed, Some("boom".into())).await.unwrap();
        assert!(repo.get_ready_tasks("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dag_view_derives_edges() {
        let repo = InMemoryTaskRepo::new();
        let a = repo.create_task("s1", "a", vec![]).await.unwrap();
        let b = repo.create_task("s1", "b", vec![a.id.clone()]).await.unwrap();
        let c = repo.create_task("s1", "c", vec![a.id.clone(), b.id.clone()]).await.unwrap();

        let dag = repo.get_dag("s1").await.unwrap();
        assert_eq!(dag.tasks.len(), 3);
        assert_eq!(dag.edges.len(), 3);
        assert!(dag.edges.contains(&DagEdge { from: a.id.clone(), to: b.id.clone() }));
        assert!(dag.edges.contains(&DagEdge { from: b.id, to: c.id }));
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let repo = InMemoryTaskRepo::new();
        repo.create_task("s1", "a", vec![]).await.unwrap();
        repo.create_task("s2", "b", vec![]).await.unwrap();
        assert_eq!(repo.get_tasks("s1").await.unwrap().len(), 1);
        assert_eq!(repo.get_ready_tasks("s2").await.unwrap().len(), 1);
    }
}
