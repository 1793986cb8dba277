//! Shared utilities for morning-snapshot
//!
//! Logging setup and environment variable helpers used by the engine's
//! configuration loader and the CLI.

pub mod env;
pub mod logging;

pub use env::{env_flag, env_parse, env_string};
pub use logging::{LogFormat, init_tracing, init_tracing_with};
