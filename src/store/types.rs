//! Persisted metadata record types
//!
//! One JSON array file per record kind lives under the metadata directory.
//! These shapes are the durable contract; renames here break stored files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a declared parameter is sourced from on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Body,
    Header,
}

/// Declared parameter type, compiled into a typed validator at deploy time.
/// Unrecognized type names degrade to string rather than failing the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    #[serde(other)]
    Unknown,
}

/// Declarative parameter descriptor attached to a mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub name: String,
    #[serde(rename = "in")]
    pub location: ParamLocation,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip: Option<bool>,
}

impl ParamDescriptor {
    /// Required defaults to true when unspecified
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(true)
    }
}

/// A named, stored reference to a backing database connection string
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub id: String,
    pub name: String,
    pub connection_url: String,
    pub created_at: DateTime<Utc>,
}

/// A named, stored parameterized SQL statement bound to one connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: String,
    pub connector_id: String,
    pub name: String,
    pub sql_text: String,
    #[serde(default)]
    pub is_proc: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fixed-window rate limit attached to a mapping
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitSpec {
    pub limit: u32,
    pub window_seconds: u64,
}

/// A published binding of an HTTP path+method to a query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    pub id: String,
    pub query_id: String,
    pub connector_id: String,
    pub path: String,
    pub method: String,
    pub params_json: Vec<ParamDescriptor>,
    pub auth_required: bool,
    #[serde(default)]
    pub deployed: bool,
    /// Cleared when the referenced connector is deleted
    #[serde(default = "default_true")]
    pub connector_valid: bool,
    /// Set when the referenced query is deleted
    #[serde(default)]
    pub invalidated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSpec>,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Mapping {
    /// A mapping can only be installed while its references are intact
    pub fn deployable(&self) -> bool {
        self.connector_valid && !self.invalidated
    }
}

/// Outcome recorded per handled request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Ok,
    Error,
}

/// Append-only request log record, keyed by request id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_id: Option<String>,
    pub time: DateTime<Utc>,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Persisted result of a schema discovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub id: String,
    pub connector_id: String,
    pub snapshot: Value,
    pub created_at: DateTime<Utc>,
}

/// API key role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Consumer,
}

/// Stored API key. Only the Argon2id hash and a SHA-256 fingerprint are
/// persisted; the plaintext token is returned exactly once at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub role: Role,
    pub hash: String,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}
