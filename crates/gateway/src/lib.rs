//! `tw-gateway`: HTTP front end, CLI and bootstrap for toolwire.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod state;
