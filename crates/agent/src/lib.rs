//! The agent loop and its supporting pieces.
//!
//! [`Agent::run`] drives one request: assemble the system prompt (with
//! long-term recall), fit the context window, stream the model, dispatch
//! tool calls (built-ins inline, everything else through the skill
//! registry with a hard per-call timeout), and surface progress as a lazy
//! sequence of [`maestro_domain::ExecutionEvent`]s.

pub mod builtins;
pub mod cancel;
pub mod history;
pub mod run;
pub mod title;

pub use cancel::{CancelMap, CancelToken};
pub use history::{HistoryRepo, InMemoryHistoryRepo, SessionRecord};
pub use run::{Agent, AgentConfig, RunInput};
pub use title::generate_title;
