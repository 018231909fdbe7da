use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// /echo handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where `GET /echo` sends the user's message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EchoRoute {
    /// Ask the chat-completion model.
    #[default]
    Model,
    /// Forward the message straight to an MCP tool.
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoConfig {
    #[serde(default)]
    pub route: EchoRoute,
    /// Tool to call in `tool` mode. Defaults to the first discovered tool.
    #[serde(default)]
    pub tool: Option<String>,
    /// Argument name the message is passed under.
    #[serde(default = "d_argument")]
    pub argument: String,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            route: EchoRoute::Model,
            tool: None,
            argument: d_argument(),
        }
    }
}

fn d_argument() -> String {
    "message".into()
}
