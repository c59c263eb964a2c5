//! Server Configuration
//!
//! Configuration for the HTTP server and metadata store, loaded from an
//! optional JSON file with environment overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to (default: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding the JSON metadata files
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: PathBuf,

    /// Bypass the admin API-key check. Off by default; intended only for
    /// local development, never production.
    #[serde(default)]
    pub dev_mode: bool,

    /// CORS allowed origins (empty = permissive, for development)
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Statement timeout applied to every executed SQL statement, seconds
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_metadata_dir() -> PathBuf {
    PathBuf::from("./metadata")
}

fn default_statement_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            metadata_dir: default_metadata_dir(),
            dev_mode: false,
            cors_origins: Vec::new(),
            statement_timeout_secs: default_statement_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file, falling back to defaults when
    /// the file does not exist. Environment variables `SQLGATE_METADATA_DIR`
    /// and `DEV_MODE` override the file.
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?
        } else {
            Self::default()
        };

        if let Ok(dir) = std::env::var("SQLGATE_METADATA_DIR") {
            config.metadata_dir = PathBuf::from(dir);
        }
        if let Ok(val) = std::env::var("DEV_MODE") {
            config.dev_mode = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
