//! Shared domain types for the Maestro agent runtime.
//!
//! Everything here is provider- and transport-agnostic: conversation
//! messages, tool descriptors, stream chunks, execution events, and the
//! workspace-wide error enum. Heavier machinery (providers, registries,
//! executors) lives in the sibling crates and depends on this one.

pub mod error;
pub mod event;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};
pub use event::ExecutionEvent;
pub use stream::{BoxStream, StreamChunk, Usage};
pub use tool::{
    Attachment, ContentPart, Message, MessageContent, Role, ToolCall, ToolContext, ToolDefinition,
};
