//! Dependency-ordered task graph and its round-based executor.
//!
//! Tasks persist behind the [`repo::TaskRepo`] trait so they outlive a
//! single request; the [`executor::DagExecutor`] runs ready waves in
//! parallel with a barrier between rounds.

pub mod executor;
pub mod repo;
pub mod task;

pub use executor::DagExecutor;
pub use repo::{InMemoryTaskRepo, TaskRepo};
pub use task::{DagEdge, DagView, Task, TaskStatus};
