/// Shared error type used across all Maestro crates.
///
/// Tool-side failures (`ToolNotFound`, `ToolTimeout`, `ToolExecution`) are
/// recovered inside an agent iteration and fed back to the model; the
/// remaining variants end the run or the affected source only.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("config: {0}")]
    Config(String),

    #[error("source not connected: {0}")]
    NotConnected(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool {tool} timed out after {seconds}s")]
    ToolTimeout { tool: String, seconds: u64 },

    #[error("tool execution: {0}")]
    ToolExecution(String),

    #[error("llm: {0}")]
    Llm(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether an agent iteration may recover from this error by feeding
    /// it back to the model as an observation.
    pub fn is_tool_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ToolNotFound(_)
                | Error::ToolTimeout { .. }
                | Error::ToolExecution(_)
                | Error::NotConnected(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_errors_are_recoverable() {
        assert!(Error::ToolNotFound("x".into()).is_tool_recoverable());
        assert!(Error::ToolTimeout { tool: "x".into(), seconds: 60 }.is_tool_recoverable());
        assert!(Error::ToolExecution("boom".into()).is_tool_recoverable());
        assert!(Error::NotConnected("mcp-files".into()).is_tool_recoverable());
    }

    #[test]
    fn run_level_errors_are_not() {
        assert!(!Error::Llm("refused".into()).is_tool_recoverable());
        assert!(!Error::Cancelled.is_tool_recoverable());
        assert!(!Error::Config("bad".into()).is_tool_recoverable());
    }

    #[test]
    fn timeout_display_names_the_tool() {
        let e = Error::ToolTimeout { tool: "files.list".into(), seconds: 60 };
        assert_eq!(e.to_string(), "tool files.list timed out after 60s");
    }
}
