//! CLI argument definitions using clap
//!
//! Commands:
//! - sqlgate init --config <path>
//! - sqlgate start --config <path>
//! - sqlgate create-key --config <path> [--role <admin|consumer>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// sqlgate - publish stored SQL queries as live HTTP endpoints
#[derive(Parser, Debug)]
#[command(name = "sqlgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a default configuration file and create the metadata directory
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./sqlgate.json")]
        config: PathBuf,
    },

    /// Start the server
    Start {
        /// Path to configuration file
        #[arg(long, default_value = "./sqlgate.json")]
        config: PathBuf,
    },

    /// Issue an API key and print the plaintext token once
    CreateKey {
        /// Path to configuration file
        #[arg(long, default_value = "./sqlgate.json")]
        config: PathBuf,

        /// Key role: "admin" or "consumer"
        #[arg(long, default_value = "admin")]
        role: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
