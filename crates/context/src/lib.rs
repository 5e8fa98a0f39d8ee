//! Context window management: fits `{system, history, current}` into a
//! token budget by trimming old history and standing in a summary message.
//!
//! Summaries are generated by the injected LLM when one is available;
//! failures fall back to a deterministic digest of recent user messages so
//! a summariser outage never aborts a request.

pub mod estimate;
pub mod manager;
pub mod summary;

pub use estimate::estimate_tokens;
pub use manager::{ContextConfig, ContextManager};
