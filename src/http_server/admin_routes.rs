//! Admin HTTP Routes
//!
//! Endpoints for managing connectors, saved queries, route mappings, request
//! logs and API keys. Every handler authenticates an admin key first; in dev
//! mode the check is bypassed.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth;
use crate::discover;
use crate::error::{ApiError, ApiResult};
use crate::exec::{self, ExecTimeouts};
use crate::router::DeployOutcome;
use crate::store::{ParamDescriptor, RateLimitSpec, Role};

use super::AppState;

/// Hard cap on sample rows returned by schema endpoints
const MAX_SAMPLE_ROWS: usize = 100;

/// Default row cap for query previews
const DEFAULT_PREVIEW_ROWS: usize = 10;

// ==================
// Request Types
// ==================

#[derive(Debug, Deserialize)]
pub struct CreateConnectorRequest {
    pub name: String,
    pub connection_url: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConnectorRequest {
    pub name: Option<String>,
    pub connection_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateQueryRequest {
    pub connector_id: String,
    pub name: String,
    pub sql_text: String,
    #[serde(default)]
    pub is_proc: bool,
    pub description: Option<String>,
}

/// Preview either a saved query (`query_id`) or ad-hoc SQL
/// (`connector_id` + `sql_text`).
#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub query_id: Option<String>,
    pub connector_id: Option<String>,
    pub sql_text: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    pub max_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMappingRequest {
    pub query_id: String,
    pub connector_id: String,
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<ParamDescriptor>,
    #[serde(default)]
    pub auth_required: bool,
    pub rate_limit: Option<RateLimitSpec>,
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct SampleQuery {
    pub sample: Option<usize>,
}

// ==================
// Router
// ==================

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // Connectors
        .route("/connectors", post(create_connector_handler))
        .route("/connectors", get(list_connectors_handler))
        .route("/connectors/:id", put(update_connector_handler))
        .route("/connectors/:id", delete(delete_connector_handler))
        .route("/connectors/:id/test", post(test_connector_handler))
        .route("/connectors/:id/discover", post(discover_schema_handler))
        .route("/connectors/:id/schema/:table", get(table_schema_handler))
        // Saved queries
        .route("/queries", post(create_query_handler))
        .route("/queries", get(list_queries_handler))
        .route("/queries/:id", delete(delete_query_handler))
        .route("/queries/preview", post(preview_query_handler))
        // Mappings and deployment
        .route("/mappings", post(create_mapping_handler))
        .route("/mappings", get(list_mappings_handler))
        .route("/mappings/:id", delete(delete_mapping_handler))
        .route("/mappings/:id/deploy", post(deploy_mapping_handler))
        .route("/mappings/:id/undeploy", post(undeploy_mapping_handler))
        // Request logs
        .route("/logs/:request_id", get(get_log_handler))
        // Debug
        .route("/debug/routes", get(debug_routes_handler))
        // API keys
        .route("/api-keys", post(create_api_key_handler))
}

fn admin(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    auth::require_admin(&state.store, headers, state.config.dev_mode)?;
    Ok(())
}

// ==================
// Connector Handlers
// ==================

async fn create_connector_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateConnectorRequest>,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    let connector = state
        .store
        .add_connector(&request.name, &request.connection_url)?;
    Ok(Json(json!(connector)))
}

async fn list_connectors_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    Ok(Json(json!({ "connectors": state.store.list_connectors() })))
}

async fn update_connector_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateConnectorRequest>,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    let connector = state.store.update_connector(
        &id,
        request.name.as_deref(),
        request.connection_url.as_deref(),
    )?;
    Ok(Json(json!(connector)))
}

/// Deleting a connector retracts every mapping built on it. Retracted
/// mappings stay in the registry, undeployable until repointed.
async fn delete_connector_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    let affected = state.store.delete_connector(&id)?;
    for mapping_id in &affected {
        state.routes.retract(mapping_id)?;
        state.limiter.forget(mapping_id);
    }
    Ok(Json(json!({
        "deleted": id,
        "retracted_mappings": affected,
    })))
}

async fn test_connector_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    let connector = state
        .store
        .get_connector(&id)
        .ok_or_else(|| ApiError::NotFound("connector".to_string()))?;

    let url = connector.connection_url.clone();
    let probe = tokio::task::spawn_blocking(move || exec::test_connection(&url))
        .await
        .map_err(|e| ApiError::Internal(format!("probe task failed: {}", e)))?;
    Ok(Json(json!(probe)))
}

async fn discover_schema_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<SampleQuery>,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    let connector = state
        .store
        .get_connector(&id)
        .ok_or_else(|| ApiError::NotFound("connector".to_string()))?;

    let sample = query.sample.unwrap_or(5).min(MAX_SAMPLE_ROWS);
    let url = connector.connection_url.clone();
    let snapshot = tokio::task::spawn_blocking(move || discover::discover_schema(&url, sample))
        .await
        .map_err(|e| ApiError::Internal(format!("discovery task failed: {}", e)))?
        .map_err(ApiError::Execution)?;

    let record = state.store.append_schema_snapshot(&id, snapshot.clone())?;
    Ok(Json(json!({
        "snapshot_id": record.id,
        "connector_id": id,
        "schema": snapshot,
    })))
}

async fn table_schema_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, table)): Path<(String, String)>,
    Query(query): Query<SampleQuery>,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    let connector = state
        .store
        .get_connector(&id)
        .ok_or_else(|| ApiError::NotFound("connector".to_string()))?;

    let sample = query.sample.unwrap_or(5).min(MAX_SAMPLE_ROWS);
    let url = connector.connection_url.clone();
    let info = tokio::task::spawn_blocking(move || discover::get_table_info(&url, &table, sample))
        .await
        .map_err(|e| ApiError::Internal(format!("discovery task failed: {}", e)))?
        .map_err(ApiError::NotFound)?;
    Ok(Json(info))
}

// ==================
// Query Handlers
// ==================

async fn create_query_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateQueryRequest>,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    let query = state.store.add_query(
        &request.connector_id,
        &request.name,
        &request.sql_text,
        request.is_proc,
        request.description.as_deref(),
    )?;
    Ok(Json(json!(query)))
}

async fn list_queries_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    Ok(Json(json!({ "queries": state.store.list_queries() })))
}

async fn delete_query_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    let affected = state.store.delete_query(&id)?;
    for mapping_id in &affected {
        state.routes.retract(mapping_id)?;
        state.limiter.forget(mapping_id);
    }
    Ok(Json(json!({
        "deleted": id,
        "retracted_mappings": affected,
    })))
}

/// Runs the statement inside a transaction that is always rolled back, so
/// previews of writes never alter the database.
async fn preview_query_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PreviewRequest>,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;

    let (connector_id, sql_text) = match &request.query_id {
        Some(query_id) => {
            let query = state
                .store
                .get_query(query_id)
                .ok_or_else(|| ApiError::NotFound("query".to_string()))?;
            (query.connector_id, query.sql_text)
        }
        None => {
            let connector_id = request.connector_id.clone().ok_or_else(|| {
                ApiError::Conflict("either query_id or connector_id is required".to_string())
            })?;
            let sql_text = request.sql_text.clone().ok_or_else(|| {
                ApiError::Conflict("sql_text is required for ad-hoc preview".to_string())
            })?;
            (connector_id, sql_text)
        }
    };
    let connector = state
        .store
        .get_connector(&connector_id)
        .ok_or_else(|| ApiError::NotFound("connector".to_string()))?;

    // Reject before touching the engine when placeholders are uncovered.
    let missing = exec::missing_params(&sql_text, request.params.keys().map(String::as_str));
    if !missing.is_empty() {
        return Err(ApiError::Validation {
            field: missing.join(", "),
            message: "missing parameter values for preview".to_string(),
        });
    }

    let max_rows = request
        .max_rows
        .unwrap_or(DEFAULT_PREVIEW_ROWS)
        .min(MAX_SAMPLE_ROWS);
    let timeouts = ExecTimeouts::with_statement_secs(state.config.statement_timeout_secs);
    let url = connector.connection_url.clone();
    let params = request.params.clone();
    let outcome =
        tokio::task::spawn_blocking(move || exec::preview(&url, &sql_text, &params, max_rows, timeouts))
            .await
            .map_err(|e| ApiError::Internal(format!("preview task failed: {}", e)))?;
    Ok(Json(json!(outcome)))
}

// ==================
// Mapping Handlers
// ==================

async fn create_mapping_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateMappingRequest>,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    let mapping = state.store.add_mapping(
        &request.query_id,
        &request.connector_id,
        &request.path,
        &request.method,
        request.params,
        request.auth_required,
        request.rate_limit,
    )?;
    Ok(Json(json!(mapping)))
}

async fn list_mappings_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    Ok(Json(json!({ "mappings": state.store.list_mappings() })))
}

async fn delete_mapping_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    state.routes.remove(&id)?;
    state.limiter.forget(&id);
    Ok(Json(json!({ "deleted": id })))
}

async fn deploy_mapping_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    let status = match state.routes.deploy(&id)? {
        DeployOutcome::Deployed => {
            state.counters.incr_deploys();
            "deployed"
        }
        DeployOutcome::AlreadyDeployed => "already_deployed",
    };
    Ok(Json(json!({ "mapping_id": id, "status": status })))
}

async fn undeploy_mapping_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    state.routes.undeploy(&id)?;
    state.counters.incr_undeploys();
    Ok(Json(json!({ "mapping_id": id, "status": "undeployed" })))
}

// ==================
// Log & Debug Handlers
// ==================

async fn get_log_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    let record = state
        .store
        .find_log(&request_id)
        .ok_or_else(|| ApiError::NotFound("log record".to_string()))?;
    Ok(Json(json!(record)))
}

async fn debug_routes_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    Ok(Json(json!({ "routes": state.routes.installed_routes() })))
}

// ==================
// API Key Handlers
// ==================

async fn create_api_key_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateApiKeyRequest>,
) -> ApiResult<Json<Value>> {
    admin(&state, &headers)?;
    let token = auth::issue_key(&state.store, request.role)?;
    // The plaintext appears in this response and nowhere else.
    Ok(Json(json!({ "token": token, "role": request.role })))
}
