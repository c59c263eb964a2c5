//! CLI-specific error types. All CLI errors are fatal.

use thiserror::Error;

/// CLI error, formatted as `CODE: message` on stderr
#[derive(Debug, Error)]
pub enum CliError {
    #[error("SQLGATE_CLI_CONFIG_ERROR: {0}")]
    Config(String),

    #[error("SQLGATE_CLI_IO_ERROR: {0}")]
    Io(String),

    #[error("SQLGATE_CLI_BOOT_FAILED: {0}")]
    Boot(String),
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::Io(format!("JSON error: {}", e))
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
