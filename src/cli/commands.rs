//! CLI command implementations
//!
//! `start` owns the tokio runtime; `main` stays synchronous and only
//! dispatches here.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::auth;
use crate::config::ServerConfig;
use crate::http_server::{AppState, HttpServer};
use crate::store::{MetaStore, Role};

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};

/// Parse arguments and dispatch to the selected command.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    match cli.command {
        Command::Init { config } => init(&config),
        Command::Start { config } => start(&config),
        Command::CreateKey { config, role } => create_key(&config, &role),
    }
}

/// Write a default config file and create its metadata directory.
pub fn init(config_path: &Path) -> CliResult<()> {
    if config_path.exists() {
        return Err(CliError::Config(format!(
            "config already exists: {}",
            config_path.display()
        )));
    }
    let config = ServerConfig::default();
    fs::write(config_path, serde_json::to_string_pretty(&config)?)?;
    fs::create_dir_all(&config.metadata_dir)?;
    println!("wrote {}", config_path.display());
    println!("metadata directory: {}", config.metadata_dir.display());
    Ok(())
}

/// Boot the server: config, store, state, then serve until shutdown.
pub fn start(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let state = AppState::new(store, config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Boot(format!("runtime startup failed: {}", e)))?;
    runtime
        .block_on(HttpServer::new(state).start())
        .map_err(|e| CliError::Boot(e.to_string()))
}

/// Issue an API key against the configured store and print the token.
pub fn create_key(config_path: &Path, role: &str) -> CliResult<()> {
    let role = match role {
        "admin" => Role::Admin,
        "consumer" => Role::Consumer,
        other => {
            return Err(CliError::Config(format!(
                "unknown role '{}', expected 'admin' or 'consumer'",
                other
            )))
        }
    };
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let token =
        auth::issue_key(&store, role).map_err(|e| CliError::Boot(format!("key issue failed: {}", e)))?;

    eprintln!("Store this token now; it cannot be recovered later.");
    println!("{}", token);
    Ok(())
}

fn load_config(path: &Path) -> CliResult<ServerConfig> {
    ServerConfig::load(path).map_err(|e| CliError::Config(e.to_string()))
}

fn open_store(config: &ServerConfig) -> CliResult<Arc<MetaStore>> {
    MetaStore::open(&config.metadata_dir)
        .map(Arc::new)
        .map_err(|e| CliError::Boot(format!("metadata store open failed: {}", e)))
}
