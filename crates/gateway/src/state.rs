use std::sync::Arc;
use std::time::Instant;

use tw_domain::config::Config;
use tw_mcp_client::McpClient;
use tw_providers::ChatModel;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Connected MCP session; `None` when no `[mcp]` section is configured.
    pub mcp: Option<McpClient>,
    /// Chat-completion model; `None` when no API key could be resolved.
    pub model: Option<Arc<dyn ChatModel>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Arc<Config>, mcp: Option<McpClient>, model: Option<Arc<dyn ChatModel>>) -> Self {
        Self {
            config,
            mcp,
            model,
            started_at: Instant::now(),
        }
    }
}
