pub mod config;
pub mod tools;

use clap::{Parser, Subcommand};

/// toolwire: MCP client runtime with a thin HTTP front end.
#[derive(Debug, Parser)]
#[command(name = "toolwire", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP server (default when no subcommand is given).
    Serve,
    /// Connect to the configured MCP server and list its tools.
    Tools {
        /// Print the full descriptors as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Invoke one tool on the configured MCP server and print the result.
    Call {
        /// Tool name.
        tool: String,
        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Per-call timeout in seconds (defaults to `mcp.timeout_seconds`).
        #[arg(long)]
        timeout: Option<u64>,
        /// Print the raw result as JSON instead of its text content.
        #[arg(long)]
        json: bool,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `TOOLWIRE_CONFIG` (or
/// `config.toml` by default).  Returns the parsed [`Config`] and the
/// path that was used.
///
/// [`Config`]: tw_domain::config::Config
pub fn load_config() -> anyhow::Result<(tw_domain::config::Config, String)> {
    let config_path = std::env::var("TOOLWIRE_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

/// Parse the file at `path`; a missing file yields all defaults.
pub fn load_config_from(path: &str) -> anyhow::Result<tw_domain::config::Config> {
    if !std::path::Path::new(path).exists() {
        return Ok(tw_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("reading {path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {path}: {e}"))
}
