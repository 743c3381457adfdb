//! Cobble CLI library
//!
//! Command-line front end for the Cobble central: argument parsing,
//! configuration loading and the `scan`/`connect` command handlers.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::{simulated_adapter, CommandDispatcher, ConnectPlan, ConnectReport};
pub use config::AppConfig;
pub use error::{CliError, Result};
