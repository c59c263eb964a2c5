//! # Request Handler Pipeline
//!
//! The fallback handler behind every published route. Stages, in order:
//! route match, parameter gathering (path > query > body > headers),
//! validation, authentication, rate limiting, execution, logging.
//!
//! Statement execution runs on the blocking pool; the route table lock is
//! never held past the match stage.

use std::collections::HashMap;
use std::time::Instant;

use axum::body::to_bytes;
use axum::extract::{Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::auth;
use crate::error::{ApiError, ApiResult};
use crate::exec::{self, ExecTimeouts};
use crate::router::{LiveRoute, RouteEntry};
use crate::store::{LogRecord, LogStatus};

use crate::http_server::AppState;

/// Request bodies above this size are ignored rather than buffered.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Entry point wired as the axum fallback. Anything that is not an admin or
/// health route lands here.
pub async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    state.counters.incr_requests();
    match handle(&state, req).await {
        Ok(response) => response,
        Err(err) => {
            state.counters.incr_errors();
            err.into_response()
        }
    }
}

async fn handle(state: &AppState, req: Request) -> ApiResult<Response> {
    let method = req.method().as_str().to_uppercase();
    let path = req.uri().path().to_string();

    let Some((entry, path_captures)) = state.routes.match_route(&method, &path) else {
        return Err(ApiError::NotFound(format!("route {} {}", method, path)));
    };
    let route = match entry.as_ref() {
        RouteEntry::Gone { .. } => return Err(ApiError::Gone),
        RouteEntry::Live(route) => route,
    };

    let headers = req.headers().clone();
    let raw = gather_params(route, path_captures, req, &headers).await;
    // Validation precedes auth so malformed requests are cheap to reject
    // and never touch key storage.
    let validated = route.validator.validate(&raw)?;

    if route.auth_required {
        auth::require_key(&state.store, &headers)?;
    }
    if !state.limiter.allow(&route.mapping_id, route.rate_limit) {
        return Err(ApiError::RateLimited);
    }

    // Looked up per request: a cascade deletion between install and now
    // must fail loudly instead of serving stale SQL.
    let query = state
        .store
        .get_query(&route.query_id)
        .ok_or_else(|| ApiError::Consistency("backing query missing".to_string()))?;
    let connector = state
        .store
        .get_connector(&route.connector_id)
        .ok_or_else(|| ApiError::Consistency("backing connector missing".to_string()))?;

    let sql_params = validated.sql_params();
    let max_rows = validated.limit().max(0) as usize;
    let offset = validated.offset().max(0) as usize;
    let timeouts = ExecTimeouts::with_statement_secs(state.config.statement_timeout_secs);

    let url = connector.connection_url.clone();
    let sql = query.sql_text.clone();
    let bind = sql_params.clone();
    let start = Instant::now();
    let outcome =
        tokio::task::spawn_blocking(move || exec::execute(&url, &sql, &bind, max_rows, offset, timeouts))
            .await
            .map_err(|e| ApiError::Internal(format!("executor task failed: {}", e)))?;
    let duration_ms = start.elapsed().as_millis() as u64;

    let request_id = Uuid::new_v4().simple().to_string();
    let record = LogRecord {
        request_id: request_id.clone(),
        mapping_id: Some(route.mapping_id.clone()),
        time: Utc::now(),
        status: if outcome.ok {
            LogStatus::Ok
        } else {
            LogStatus::Error
        },
        duration_ms: Some(duration_ms),
        params: Some(Value::Object(Map::from_iter(sql_params))),
        rows_count: outcome.rows.as_ref().map(Vec::len),
        error: outcome.error.clone(),
        error_code: if outcome.ok {
            None
        } else {
            Some("EXECUTION_ERROR".to_string())
        },
    };
    // Logging is best-effort; a full disk must not mask the query result.
    let _ = state.store.append_log(&record);

    if !outcome.ok {
        return Err(ApiError::Execution(
            outcome
                .error
                .unwrap_or_else(|| "statement execution failed".to_string()),
        ));
    }

    // Truncation is flagged at the top level too, so clients paging with
    // limit/offset never have to dig into the result shape.
    let truncated = outcome.more == Some(true);
    let mut body = json!({
        "request_id": request_id,
        "duration_ms": duration_ms,
        "result": outcome,
    });
    if truncated {
        body["more"] = json!(true);
    }
    Ok(Json(body).into_response())
}

/// Merge parameter sources by precedence: path captures, then query string,
/// then JSON body, then declared header parameters. Earlier sources win.
async fn gather_params(
    route: &LiveRoute,
    path_captures: HashMap<String, String>,
    req: Request,
    headers: &HeaderMap,
) -> HashMap<String, Value> {
    let mut raw: HashMap<String, Value> = path_captures
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    if let Ok(Query(query)) = Query::<HashMap<String, String>>::try_from_uri(req.uri()) {
        for (k, v) in query {
            raw.entry(k).or_insert(Value::String(v));
        }
    }

    // Body is consulted only for JSON payloads; a malformed body is treated
    // as absent rather than rejected, so validation reports missing fields.
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);
    if is_json {
        if let Ok(bytes) = to_bytes(req.into_body(), MAX_BODY_BYTES).await {
            if let Ok(Value::Object(body)) = serde_json::from_slice::<Value>(&bytes) {
                for (k, v) in body {
                    raw.entry(k).or_insert(v);
                }
            }
        }
    }

    for name in &route.header_params {
        if raw.contains_key(name) {
            continue;
        }
        if let Some(v) = headers.get(name.as_str()).and_then(|v| v.to_str().ok()) {
            raw.insert(name.clone(), Value::String(v.to_string()));
        }
    }

    raw
}
