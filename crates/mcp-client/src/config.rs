//! MCP transport configuration: re-exported from `tw-domain`.
//!
//! The canonical definitions live in `tw_domain::config` so that the
//! gateway config deserializer can include them without depending on
//! the full MCP client crate.

pub use tw_domain::config::{TransportConfig, TransportMode};
