//! # Metadata Store
//!
//! Persistence for connectors, queries, mappings, schema snapshots, request
//! logs and API keys. Each record kind is a JSON array in its own file under
//! the metadata directory; writes go to a temp file, fsync, then rename so a
//! reader never observes a partial file. Unreadable or missing files read as
//! empty lists.

mod types;

pub use types::{
    ApiKeyRecord, Connector, LogRecord, LogStatus, Mapping, ParamDescriptor, ParamLocation,
    ParamType, QueryRecord, RateLimitSpec, Role, SchemaSnapshot,
};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ApiError;

const CONNECTORS_FILE: &str = "connectors.json";
const QUERIES_FILE: &str = "queries.json";
const MAPPINGS_FILE: &str = "mappings.json";
const SCHEMAS_FILE: &str = "schemas.json";
const LOGS_FILE: &str = "logs.json";
const API_KEYS_FILE: &str = "api_keys.json";

const ALLOWED_METHODS: [&str; 4] = ["GET", "POST", "PUT", "DELETE"];

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Metadata store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::Invalid(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// File-backed metadata store
///
/// Read-modify-write cycles are serialized by a single store-wide mutex;
/// plain reads go straight to the file since the rename makes every visible
/// file state complete.
pub struct MetaStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl MetaStore {
    /// Open the store, creating the metadata directory if needed.
    ///
    /// An unwritable directory is the one fault treated as fatal at startup.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ==================
    // File primitives
    // ==================

    fn read_list<T: DeserializeOwned>(&self, file: &str) -> Vec<T> {
        let path = self.dir.join(file);
        match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    fn write_list_atomic<T: Serialize>(&self, file: &str, data: &[T]) -> StoreResult<()> {
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!("{}.tmp", file));

        let text = serde_json::to_string_pretty(data)?;
        let mut f = fs::File::create(&tmp)?;
        f.write_all(text.as_bytes())?;
        f.sync_all()?;
        drop(f);
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Internal("lock poisoned".to_string()))
    }

    // ==================
    // Connectors
    // ==================

    pub fn list_connectors(&self) -> Vec<Connector> {
        self.read_list(CONNECTORS_FILE)
    }

    pub fn get_connector(&self, id: &str) -> Option<Connector> {
        self.list_connectors().into_iter().find(|c| c.id == id)
    }

    pub fn add_connector(&self, name: &str, connection_url: &str) -> StoreResult<Connector> {
        if connection_url.trim().is_empty() {
            return Err(StoreError::Invalid("connection_url is required".to_string()));
        }
        let _guard = self.lock()?;
        let mut connectors = self.list_connectors();
        let entry = Connector {
            id: Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            connection_url: connection_url.to_string(),
            created_at: Utc::now(),
        };
        connectors.push(entry.clone());
        self.write_list_atomic(CONNECTORS_FILE, &connectors)?;
        Ok(entry)
    }

    pub fn update_connector(
        &self,
        id: &str,
        name: Option<&str>,
        connection_url: Option<&str>,
    ) -> StoreResult<Connector> {
        let _guard = self.lock()?;
        let mut connectors = self.list_connectors();
        let entry = connectors
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound("connector".to_string()))?;

        if let Some(name) = name {
            entry.name = name.to_string();
        }
        if let Some(url) = connection_url {
            entry.connection_url = url.to_string();
        }
        let updated = entry.clone();
        self.write_list_atomic(CONNECTORS_FILE, &connectors)?;
        Ok(updated)
    }

    /// Delete a connector. Every mapping referencing it loses
    /// `connector_valid` and its deployed flag; the affected mapping ids are
    /// returned so the router manager can retract live handlers.
    pub fn delete_connector(&self, id: &str) -> StoreResult<Vec<String>> {
        let _guard = self.lock()?;
        let mut connectors = self.list_connectors();
        let before = connectors.len();
        connectors.retain(|c| c.id != id);
        if connectors.len() == before {
            return Err(StoreError::NotFound("connector".to_string()));
        }
        self.write_list_atomic(CONNECTORS_FILE, &connectors)?;

        let mut mappings: Vec<Mapping> = self.read_list(MAPPINGS_FILE);
        let mut affected = Vec::new();
        for m in mappings.iter_mut() {
            if m.connector_id == id {
                m.connector_valid = false;
                m.deployed = false;
                affected.push(m.id.clone());
            }
        }
        if !affected.is_empty() {
            self.write_list_atomic(MAPPINGS_FILE, &mappings)?;
        }
        Ok(affected)
    }

    // ==================
    // Queries
    // ==================

    pub fn list_queries(&self) -> Vec<QueryRecord> {
        self.read_list(QUERIES_FILE)
    }

    pub fn get_query(&self, id: &str) -> Option<QueryRecord> {
        self.list_queries().into_iter().find(|q| q.id == id)
    }

    pub fn add_query(
        &self,
        connector_id: &str,
        name: &str,
        sql_text: &str,
        is_proc: bool,
        description: Option<&str>,
    ) -> StoreResult<QueryRecord> {
        if self.get_connector(connector_id).is_none() {
            return Err(StoreError::Invalid("connector_id not found".to_string()));
        }
        if sql_text.trim().is_empty() {
            return Err(StoreError::Invalid("sql_text is required".to_string()));
        }
        if is_proc {
            let low = sql_text.trim().to_lowercase();
            if !(low.starts_with("call") || low.starts_with("exec") || low.contains("procedure")) {
                return Err(StoreError::Invalid(
                    "is_proc=true but sql_text does not look like a stored procedure call"
                        .to_string(),
                ));
            }
        }

        let _guard = self.lock()?;
        let mut queries = self.list_queries();
        let entry = QueryRecord {
            id: Uuid::new_v4().simple().to_string(),
            connector_id: connector_id.to_string(),
            name: name.to_string(),
            sql_text: sql_text.to_string(),
            is_proc,
            description: description.map(|s| s.to_string()),
            created_at: Utc::now(),
        };
        queries.push(entry.clone());
        self.write_list_atomic(QUERIES_FILE, &queries)?;
        Ok(entry)
    }

    /// Delete a query. Referencing mappings become invalidated and lose the
    /// deployed flag; affected ids are returned for retraction.
    pub fn delete_query(&self, id: &str) -> StoreResult<Vec<String>> {
        let _guard = self.lock()?;
        let mut queries = self.list_queries();
        let before = queries.len();
        queries.retain(|q| q.id != id);
        if queries.len() == before {
            return Err(StoreError::NotFound("query".to_string()));
        }
        self.write_list_atomic(QUERIES_FILE, &queries)?;

        let mut mappings: Vec<Mapping> = self.read_list(MAPPINGS_FILE);
        let mut affected = Vec::new();
        for m in mappings.iter_mut() {
            if m.query_id == id {
                m.invalidated = true;
                m.deployed = false;
                affected.push(m.id.clone());
            }
        }
        if !affected.is_empty() {
            self.write_list_atomic(MAPPINGS_FILE, &mappings)?;
        }
        Ok(affected)
    }

    // ==================
    // Mappings
    // ==================

    pub fn list_mappings(&self) -> Vec<Mapping> {
        self.read_list(MAPPINGS_FILE)
    }

    pub fn get_mapping(&self, id: &str) -> Option<Mapping> {
        self.list_mappings().into_iter().find(|m| m.id == id)
    }

    pub fn list_deployed(&self) -> Vec<Mapping> {
        self.list_mappings()
            .into_iter()
            .filter(|m| m.deployed)
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_mapping(
        &self,
        query_id: &str,
        connector_id: &str,
        path: &str,
        method: &str,
        params_json: Vec<ParamDescriptor>,
        auth_required: bool,
        rate_limit: Option<RateLimitSpec>,
    ) -> StoreResult<Mapping> {
        if !path.starts_with('/') {
            return Err(StoreError::Invalid("path must start with /".to_string()));
        }
        let method_u = method.to_uppercase();
        if !ALLOWED_METHODS.contains(&method_u.as_str()) {
            return Err(StoreError::Invalid(
                "method must be one of GET/POST/PUT/DELETE".to_string(),
            ));
        }
        if self.get_connector(connector_id).is_none() {
            return Err(StoreError::Invalid("connector_id not found".to_string()));
        }
        if self.get_query(query_id).is_none() {
            return Err(StoreError::Invalid("query_id not found".to_string()));
        }

        let _guard = self.lock()?;
        let mut mappings = self.list_mappings();
        if mappings
            .iter()
            .any(|m| m.path == path && m.method == method_u)
        {
            return Err(StoreError::Invalid(
                "path already in use for this method".to_string(),
            ));
        }

        let entry = Mapping {
            id: Uuid::new_v4().simple().to_string(),
            query_id: query_id.to_string(),
            connector_id: connector_id.to_string(),
            path: path.to_string(),
            method: method_u,
            params_json,
            auth_required,
            deployed: false,
            connector_valid: true,
            invalidated: false,
            rate_limit,
            created_at: Utc::now(),
        };
        mappings.push(entry.clone());
        self.write_list_atomic(MAPPINGS_FILE, &mappings)?;
        Ok(entry)
    }

    /// Mark a mapping deployed/undeployed. Idempotent; the write is durable
    /// before the caller mutates the route table (persist-then-install).
    pub fn set_mapping_deployed(&self, id: &str, deployed: bool) -> StoreResult<Mapping> {
        let _guard = self.lock()?;
        let mut mappings = self.list_mappings();
        let entry = mappings
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StoreError::NotFound("mapping".to_string()))?;
        entry.deployed = deployed;
        let updated = entry.clone();
        self.write_list_atomic(MAPPINGS_FILE, &mappings)?;
        Ok(updated)
    }

    pub fn delete_mapping(&self, id: &str) -> StoreResult<()> {
        let _guard = self.lock()?;
        let mut mappings = self.list_mappings();
        let before = mappings.len();
        mappings.retain(|m| m.id != id);
        if mappings.len() == before {
            return Err(StoreError::NotFound("mapping".to_string()));
        }
        self.write_list_atomic(MAPPINGS_FILE, &mappings)
    }

    // ==================
    // Schema snapshots
    // ==================

    pub fn append_schema_snapshot(
        &self,
        connector_id: &str,
        snapshot: serde_json::Value,
    ) -> StoreResult<SchemaSnapshot> {
        let _guard = self.lock()?;
        let mut schemas: Vec<SchemaSnapshot> = self.read_list(SCHEMAS_FILE);
        let record = SchemaSnapshot {
            id: Uuid::new_v4().simple().to_string(),
            connector_id: connector_id.to_string(),
            snapshot,
            created_at: Utc::now(),
        };
        schemas.push(record.clone());
        self.write_list_atomic(SCHEMAS_FILE, &schemas)?;
        Ok(record)
    }

    pub fn list_schema_snapshots(&self) -> Vec<SchemaSnapshot> {
        self.read_list(SCHEMAS_FILE)
    }

    // ==================
    // Request logs
    // ==================

    pub fn append_log(&self, record: &LogRecord) -> StoreResult<()> {
        let _guard = self.lock()?;
        let mut logs: Vec<LogRecord> = self.read_list(LOGS_FILE);
        logs.push(record.clone());
        self.write_list_atomic(LOGS_FILE, &logs)
    }

    pub fn find_log(&self, request_id: &str) -> Option<LogRecord> {
        self.read_list::<LogRecord>(LOGS_FILE)
            .into_iter()
            .find(|l| l.request_id == request_id)
    }

    // ==================
    // API keys
    // ==================

    pub fn list_api_keys(&self) -> Vec<ApiKeyRecord> {
        self.read_list(API_KEYS_FILE)
    }

    pub fn add_api_key_record(&self, record: ApiKeyRecord) -> StoreResult<()> {
        let _guard = self.lock()?;
        let mut keys = self.list_api_keys();
        keys.push(record);
        self.write_list_atomic(API_KEYS_FILE, &keys)
    }
}
