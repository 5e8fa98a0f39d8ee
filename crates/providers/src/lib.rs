//! LLM provider adapters.
//!
//! Two wire shapes are supported, each normalised into
//! [`maestro_domain::StreamChunk`]s:
//! - [`anthropic`]: content-block framed streaming (`content_block_start`
//!   / `_delta` / `_stop`, terminal `message_stop`);
//! - [`openai_compat`]: indexed tool-call deltas with a `finish_reason`
//!   terminal chunk.

pub mod anthropic;
pub mod openai_compat;
pub mod sse;
pub mod traits;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use traits::{
    ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider, ProviderConfig,
};
