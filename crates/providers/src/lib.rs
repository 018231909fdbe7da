//! `tw-providers`: the chat-completion capability the gateway answers with.
//!
//! The rest of the workspace only sees [`ChatModel::generate`]; the adapter
//! behind it is an OpenAI-compatible HTTP client.

pub mod openai_compat;
pub mod traits;
pub(crate) mod util;

// Re-exports for convenience.
pub use openai_compat::OpenAiCompatModel;
pub use traits::{ChatModel, ChatResponse, Usage};
pub use util::resolve_api_key;
