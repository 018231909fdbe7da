//! `tw-domain`: configuration and shared error types for toolwire.
//!
//! Kept free of runtime dependencies so every other crate (and the config
//! loader in the gateway) can depend on it cheaply.

pub mod config;
pub mod error;
