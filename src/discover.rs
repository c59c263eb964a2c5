//! # Schema Discovery
//!
//! Introspects a connector's database: table list, column metadata, primary
//! keys and a small sample of rows. Used only by admin tooling, never by the
//! runtime handler pipeline.

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{json, Map, Number, Value};

use crate::exec::{self, ExecTimeouts};

/// Discover the full schema for a connector URL.
///
/// Snapshot shape: `{tables: {name: {columns, pk, sample_rows}}}`.
pub fn discover_schema(url: &str, sample_rows: usize) -> Result<Value, String> {
    let conn = exec::open(url, ExecTimeouts::default())?;

    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
        .map_err(|e| e.to_string())?;
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| e.to_string())?
        .collect::<Result<_, _>>()
        .map_err(|e| e.to_string())?;
    drop(stmt);

    let mut out = Map::new();
    for table in tables {
        out.insert(table.clone(), table_info(&conn, &table, sample_rows)?);
    }
    Ok(json!({ "tables": out }))
}

/// Column metadata, primary key and sample rows for a single table.
pub fn get_table_info(url: &str, table: &str, sample_rows: usize) -> Result<Value, String> {
    let conn = exec::open(url, ExecTimeouts::default())?;
    let info = table_info(&conn, table, sample_rows)?;
    let mut obj = Map::new();
    obj.insert("table".to_string(), Value::String(table.to_string()));
    if let Value::Object(fields) = info {
        for (k, v) in fields {
            obj.insert(k, v);
        }
    }
    Ok(Value::Object(obj))
}

fn table_info(conn: &Connection, table: &str, sample_rows: usize) -> Result<Value, String> {
    let quoted = quote_ident(table);

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quoted))
        .map_err(|e| e.to_string())?;
    let mut columns = Vec::new();
    let mut pk = Vec::new();
    let mut rows = stmt.query([]).map_err(|e| e.to_string())?;
    while let Some(row) = rows.next().map_err(|e| e.to_string())? {
        let name: String = row.get(1).map_err(|e| e.to_string())?;
        let col_type: String = row.get(2).map_err(|e| e.to_string())?;
        let notnull: bool = row.get(3).map_err(|e| e.to_string())?;
        let default: Option<String> = row.get(4).map_err(|e| e.to_string())?;
        let pk_pos: i64 = row.get(5).map_err(|e| e.to_string())?;

        if pk_pos > 0 {
            pk.push(Value::String(name.clone()));
        }
        columns.push(json!({
            "name": name,
            "type": col_type,
            "nullable": !notnull,
            "default": default,
        }));
    }
    drop(rows);
    drop(stmt);

    if columns.is_empty() {
        return Err(format!("table not found: {}", table));
    }

    // Sampling is best-effort; an unreadable table still yields metadata.
    let sample = sample_table(conn, &quoted, sample_rows).unwrap_or_default();

    Ok(json!({
        "columns": columns,
        "pk": pk,
        "sample_rows": sample,
    }))
}

fn sample_table(conn: &Connection, quoted: &str, limit: usize) -> Result<Vec<Value>, String> {
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {} LIMIT ?1", quoted))
        .map_err(|e| e.to_string())?;
    let column_count = stmt.column_count();

    let mut out = Vec::new();
    let mut rows = stmt
        .query([limit as i64])
        .map_err(|e| e.to_string())?;
    while let Some(row) = rows.next().map_err(|e| e.to_string())? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let val = row.get_ref(i).map_err(|e| e.to_string())?;
            values.push(match val {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(i) => Value::from(i),
                ValueRef::Real(f) => {
                    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
                }
                ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
                ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            });
        }
        out.push(Value::Array(values));
    }
    Ok(out)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
