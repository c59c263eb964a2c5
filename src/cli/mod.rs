//! CLI module
//!
//! Provides the command-line interface:
//! - init: write a default config and create the metadata directory
//! - start: boot the server and serve until shutdown
//! - create-key: issue an API key and print the plaintext token once

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{create_key, init, run, start};
pub use errors::{CliError, CliResult};
