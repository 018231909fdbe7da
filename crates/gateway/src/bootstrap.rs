//! AppState construction extracted from `main.rs`.
//!
//! `serve` boots through [`build_app_state`]; the one-shot `tools` and `call`
//! commands only need [`connect_mcp`].

use std::sync::Arc;

use anyhow::Context;

use tw_domain::config::{Config, ConfigSeverity, EchoRoute, LlmConfig};
use tw_mcp_client::McpClient;
use tw_providers::{ChatModel, OpenAiCompatModel};

use crate::state::AppState;

/// Validate config, connect every subsystem and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Chat-completion model ────────────────────────────────────────
    let model = build_model(&config.llm);
    if model.is_none() && config.echo.route == EchoRoute::Model {
        tracing::warn!("no chat model available, /echo will answer 503");
    }

    // ── MCP session ──────────────────────────────────────────────────
    let mcp = match &config.mcp {
        Some(_) => Some(connect_mcp(&config).await?),
        None => None,
    };

    Ok(AppState::new(config, mcp, model))
}

/// Build the chat model from `[llm]`. A missing API key is not fatal; the
/// gateway still serves tool routes.
pub fn build_model(cfg: &LlmConfig) -> Option<Arc<dyn ChatModel>> {
    match OpenAiCompatModel::from_config(cfg) {
        Ok(model) => {
            tracing::info!(model = %cfg.model, base_url = %cfg.base_url, "chat model ready");
            Some(Arc::new(model))
        }
        Err(e) => {
            tracing::warn!(error = %e, "chat model unavailable");
            None
        }
    }
}

/// Connect to the MCP server named by `[mcp]` and run the handshake.
pub async fn connect_mcp(config: &Config) -> anyhow::Result<McpClient> {
    let transport = config
        .mcp
        .as_ref()
        .context("no [mcp] section in config")?;

    let client = McpClient::connect(transport)
        .await
        .context("connecting to MCP server")?;

    let session = client.session();
    tracing::info!(
        session_id = %session.id,
        protocol_version = session.protocol_version.as_deref().unwrap_or("-"),
        server = session.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or("-"),
        tools = client.tools().len(),
        "MCP server connected"
    );
    Ok(client)
}
