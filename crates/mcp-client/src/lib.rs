//! Remote skill source speaking the Model-Context-Protocol.
//!
//! A configured server is reached over one of two transports: a spawned
//! child process exchanging newline-delimited JSON-RPC over stdio, or an
//! HTTP SSE stream with a companion POST channel. The
//! [`source::McpSkillSource`] supervises the connection: handshake, tool
//! discovery, prefixed advertisement (`mcp-<name>.<tool>`), and indefinite
//! exponential-backoff reconnection until destroyed.

pub mod config;
pub mod protocol;
pub mod source;
pub mod transport;

pub use config::{McpServerConfig, McpTransportKind};
pub use source::McpSkillSource;
