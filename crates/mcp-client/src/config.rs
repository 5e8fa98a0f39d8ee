use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use maestro_domain::error::{Error, Result};

/// Which transport a configured MCP server uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportKind {
    Stdio,
    Sse,
}

/// One configured MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Short name; the registered source becomes `mcp-<name>`.
    pub name: String,
    pub transport: McpTransportKind,
    /// Command to spawn (stdio only).
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Event-stream URL (sse only).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl McpServerConfig {
    /// Reject configs that cannot possibly connect.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("mcp server has no name".into()));
        }
        match self.transport {
            McpTransportKind::Stdio => {
                if self.command.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    return Err(Error::Config(format!(
                        "mcp server {}: stdio transport requires a command",
                        self.name
                    )));
                }
            }
            McpTransportKind::Sse => {
                if self.url.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    return Err(Error::Config(format!(
                        "mcp server {}: sse transport requires a url",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// The source name under which this server registers.
    pub fn source_name(&self) -> String {
        format!("mcp-{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio(name: &str, command: Option<&str>) -> McpServerConfig {
        McpServerConfig {
            name: name.into(),
            transport: McpTransportKind::Stdio,
            command: command.map(|s| s.into()),
            args: Vec::new(),
            env: HashMap::new(),
            url: None,
            enabled: true,
        }
    }

    #[test]
    fn stdio_requires_command() {
        assert!(stdio("files", Some("mcp-files")).validate().is_ok());
        assert!(stdio("files", None).validate().is_err());
        assert!(stdio("files", Some("  ")).validate().is_err());
    }

    #[test]
    fn sse_requires_url() {
        let mut cfg = stdio("web", None);
        cfg.transport = McpTransportKind::Sse;
        assert!(cfg.validate().is_err());
        cfg.url = Some("http://localhost:3000/sse".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn source_name_is_prefixed() {
        assert_eq!(stdio("files", Some("x")).source_name(), "mcp-files");
    }

    #[test]
    fn deserializes_with_defaults() {
        let cfg: McpServerConfig = serde_json::from_str(
            r#"{"name": "files", "transport": "stdio", "command": "mcp-files"}"#,
        )
        .unwrap();
        assert!(cfg.enabled);
        assert!(cfg.args.is_empty());
        assert_eq!(cfg.transport, McpTransportKind::Stdio);
    }
}
