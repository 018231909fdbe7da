mod echo;
mod llm;
mod mcp;
mod observability;
mod server;

pub use echo::*;
pub use llm::*;
pub use mcp::*;
pub use observability::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    /// MCP server to connect to. When absent the gateway runs model-only.
    #[serde(default)]
    pub mcp: Option<TransportConfig>,
    #[serde(default)]
    pub echo: EchoConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.llm.base_url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.base_url".into(),
                message: "base_url must not be empty".into(),
            });
        }

        match &self.mcp {
            Some(mcp) => {
                if let Err(message) = mcp.validate() {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: "mcp".into(),
                        message,
                    });
                }
            }
            None => {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: "mcp".into(),
                    message: "no MCP server configured, tool routes are disabled".into(),
                });
                if self.echo.route == EchoRoute::Tool {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: "echo.route".into(),
                        message: "route = \"tool\" needs an [mcp] section".into(),
                    });
                }
            }
        }

        if self.echo.argument.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "echo.argument".into(),
                message: "argument name must not be empty".into(),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.llm.timeout_secs, 60);
        assert!(cfg.mcp.is_none());
        assert_eq!(cfg.echo.route, EchoRoute::Model);
    }

    #[test]
    fn full_file_parses() {
        let raw = r#"
            [server]
            port = 9000

            [mcp]
            mode = "subprocess"
            command = ["docker", "run", "-i", "mcp/everything"]
            log_traffic = true

            [echo]
            route = "tool"
            tool = "echo"
        "#;
        let cfg: Config = toml::from_str(raw).unwrap();
        assert_eq!(cfg.server.port, 9000);
        let mcp = cfg.mcp.as_ref().unwrap();
        assert_eq!(mcp.command.len(), 4);
        assert!(mcp.log_traffic);
        assert_eq!(cfg.echo.route, EchoRoute::Tool);
        assert_eq!(cfg.echo.tool.as_deref(), Some("echo"));
        assert!(cfg
            .validate()
            .iter()
            .all(|e| e.severity != ConfigSeverity::Error));
    }

    #[test]
    fn tool_route_without_mcp_is_an_error() {
        let mut cfg = Config::default();
        cfg.echo.route = EchoRoute::Tool;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|e| e.field == "echo.route" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn invalid_mcp_section_is_reported() {
        let mut cfg = Config::default();
        cfg.mcp = Some(TransportConfig::stream("not-a-url"));
        let issues = cfg.validate();
        assert!(issues.iter().any(|e| e.field == "mcp" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError {
            severity: ConfigSeverity::Warning,
            field: "mcp".into(),
            message: "missing".into(),
        };
        assert_eq!(err.to_string(), "[WARN] mcp: missing");
    }
}
