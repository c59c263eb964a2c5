//! # Query Executor
//!
//! Executes stored SQL against the backing engine referenced by a connector
//! URL. Two entry points with different transaction discipline:
//!
//! - [`preview`] runs inside a transaction that is always rolled back,
//!   regardless of statement kind; used to inspect effect and row shape.
//! - [`execute`] commits writes and returns capped rows plus a `more` flag
//!   for reads.
//!
//! Failures never propagate past this boundary: every path returns a
//! [`QueryOutcome`] with `ok=false` and the engine's error text. Connections
//! are opened per call and dropped on every exit path.
//!
//! Only `sqlite://` URLs are supported; other schemes fail with a
//! structured error.

pub mod sql;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Number, Value};

pub use sql::{extract_named_params, is_select, missing_params};

/// Timeouts applied to every opened connection
#[derive(Debug, Clone, Copy)]
pub struct ExecTimeouts {
    /// How long to wait on a locked database before failing
    pub busy: Duration,
    /// Hard cap on statement execution, enforced via progress handler
    pub statement: Duration,
}

impl Default for ExecTimeouts {
    fn default() -> Self {
        Self {
            busy: Duration::from_secs(5),
            statement: Duration::from_secs(30),
        }
    }
}

impl ExecTimeouts {
    pub fn with_statement_secs(secs: u64) -> Self {
        Self {
            statement: Duration::from_secs(secs),
            ..Default::default()
        }
    }
}

/// Normalized tabular result of one statement
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rowcount: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub more: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryOutcome {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            rows: None,
            columns: None,
            message: None,
            rowcount: None,
            more: None,
            error: Some(error.into()),
        }
    }

    fn read(rows: Vec<Value>, columns: Vec<String>, more: Option<bool>) -> Self {
        Self {
            ok: true,
            rows: Some(rows),
            columns: Some(columns),
            message: None,
            rowcount: None,
            more,
            error: None,
        }
    }

    fn write(rowcount: usize) -> Self {
        Self {
            ok: true,
            rows: None,
            columns: None,
            message: Some(format!("executed, rowcount={}", rowcount)),
            rowcount: Some(rowcount),
            more: None,
            error: None,
        }
    }
}

/// Connectivity probe result
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

enum SqliteTarget {
    Memory,
    File(String),
}

fn parse_url(url: &str) -> Result<SqliteTarget, String> {
    if !url.starts_with("sqlite://") {
        let scheme = url.split("://").next().unwrap_or(url);
        return Err(format!(
            "unsupported connector url scheme: {} (only sqlite:// is supported)",
            scheme
        ));
    }
    if url.ends_with(":memory:") {
        return Ok(SqliteTarget::Memory);
    }
    // sqlite:///relative.db and sqlite:////absolute/path.db
    let path = url.strip_prefix("sqlite:///").unwrap_or("");
    if path.is_empty() {
        return Err("missing database path in connector url".to_string());
    }
    Ok(SqliteTarget::File(path.to_string()))
}

/// Open a connection with busy and statement timeouts applied.
pub fn open(url: &str, timeouts: ExecTimeouts) -> Result<Connection, String> {
    let conn = match parse_url(url)? {
        SqliteTarget::Memory => Connection::open_in_memory(),
        SqliteTarget::File(path) => Connection::open(path),
    }
    .map_err(|e| e.to_string())?;

    conn.busy_timeout(timeouts.busy)
        .map_err(|e| e.to_string())?;

    // Interrupt any statement still running past the deadline.
    let deadline = Instant::now() + timeouts.statement;
    conn.progress_handler(1000, Some(move || Instant::now() >= deadline));

    Ok(conn)
}

/// Execute with guaranteed rollback, for inspection only.
pub fn preview(
    url: &str,
    sql_text: &str,
    params: &BTreeMap<String, Value>,
    max_rows: usize,
    timeouts: ExecTimeouts,
) -> QueryOutcome {
    let conn = match open(url, timeouts) {
        Ok(c) => c,
        Err(e) => return QueryOutcome::failure(e),
    };

    let result = preview_inner(&conn, sql_text, params, max_rows);
    match result {
        Ok(outcome) => outcome,
        Err(e) => QueryOutcome::failure(e),
    }
}

fn preview_inner(
    conn: &Connection,
    sql_text: &str,
    params: &BTreeMap<String, Value>,
    max_rows: usize,
) -> Result<QueryOutcome, String> {
    let tx = conn.unchecked_transaction().map_err(|e| e.to_string())?;

    let outcome = {
        if is_select(sql_text) {
            let (rows, columns, _) = fetch_rows(&tx, sql_text, params, max_rows, 0)?;
            QueryOutcome::read(rows, columns, None)
        } else {
            let count = run_write(&tx, sql_text, params)?;
            QueryOutcome::write(count)
        }
    };

    tx.rollback().map_err(|e| e.to_string())?;
    Ok(outcome)
}

/// Execute for real: reads return capped rows plus a `more` flag, writes are
/// committed and return the affected-row count. Pagination is applied at the
/// cursor, never spliced into the SQL text.
pub fn execute(
    url: &str,
    sql_text: &str,
    params: &BTreeMap<String, Value>,
    max_rows: usize,
    offset: usize,
    timeouts: ExecTimeouts,
) -> QueryOutcome {
    let conn = match open(url, timeouts) {
        Ok(c) => c,
        Err(e) => return QueryOutcome::failure(e),
    };

    let result = if is_select(sql_text) {
        fetch_rows(&conn, sql_text, params, max_rows, offset)
            .map(|(rows, columns, more)| QueryOutcome::read(rows, columns, Some(more)))
    } else {
        execute_write(&conn, sql_text, params).map(QueryOutcome::write)
    };

    match result {
        Ok(outcome) => outcome,
        Err(e) => QueryOutcome::failure(e),
    }
}

fn execute_write(
    conn: &Connection,
    sql_text: &str,
    params: &BTreeMap<String, Value>,
) -> Result<usize, String> {
    let tx = conn.unchecked_transaction().map_err(|e| e.to_string())?;
    let count = run_write(&tx, sql_text, params)?;
    tx.commit().map_err(|e| e.to_string())?;
    Ok(count)
}

/// Lightweight connectivity check with latency measurement.
pub fn test_connection(url: &str) -> ProbeResult {
    let start = Instant::now();
    let probe = || -> Result<(), String> {
        let conn = open(url, ExecTimeouts::default())?;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| e.to_string())
    };
    match probe() {
        Ok(()) => ProbeResult {
            ok: true,
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => ProbeResult {
            ok: false,
            latency_ms: None,
            error: Some(e),
        },
    }
}

// ==================
// Statement plumbing
// ==================

fn fetch_rows(
    conn: &Connection,
    sql_text: &str,
    params: &BTreeMap<String, Value>,
    max_rows: usize,
    offset: usize,
) -> Result<(Vec<Value>, Vec<String>, bool), String> {
    let mut stmt = conn.prepare(sql_text).map_err(|e| e.to_string())?;
    bind_named(&mut stmt, params)?;

    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let mut rows = stmt.raw_query();
    for _ in 0..offset {
        if rows.next().map_err(|e| e.to_string())?.is_none() {
            return Ok((Vec::new(), columns, false));
        }
    }

    let mut out = Vec::new();
    while out.len() < max_rows {
        match rows.next().map_err(|e| e.to_string())? {
            Some(row) => {
                let mut obj = Map::new();
                for (i, col) in columns.iter().enumerate() {
                    let val = row.get_ref(i).map_err(|e| e.to_string())?;
                    obj.insert(col.clone(), json_safe(val));
                }
                out.push(Value::Object(obj));
            }
            None => break,
        }
    }

    // An empty page is never truncated, even at max_rows=0; this keeps the
    // flag consistent with the offset-exhausted path above.
    let more = !out.is_empty() && out.len() >= max_rows;
    Ok((out, columns, more))
}

fn run_write(
    conn: &Connection,
    sql_text: &str,
    params: &BTreeMap<String, Value>,
) -> Result<usize, String> {
    let mut stmt = conn.prepare(sql_text).map_err(|e| e.to_string())?;
    bind_named(&mut stmt, params)?;
    stmt.raw_execute().map_err(|e| e.to_string())
}

/// Bind validated parameters to the statement's named placeholders by
/// parameter index. Values only ever travel through the bind API; SQL text
/// is never interpolated.
fn bind_named(
    stmt: &mut rusqlite::Statement<'_>,
    params: &BTreeMap<String, Value>,
) -> Result<(), String> {
    for idx in 1..=stmt.parameter_count() {
        let placeholder = stmt
            .parameter_name(idx)
            .map(|s| s.to_string())
            .ok_or_else(|| "positional placeholders are not supported".to_string())?;
        let name = placeholder.trim_start_matches([':', '@']);
        let value = params
            .get(name)
            .ok_or_else(|| format!("missing params: ['{}']", name))?;
        stmt.raw_bind_parameter(idx, to_sql_value(value))
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn to_sql_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sql::Integer(i)
            } else {
                Sql::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

/// Coerce an engine value to a JSON-safe scalar: integers, reals and text
/// pass through, blobs are stringified lossily, NULL stays null.
fn json_safe(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}
