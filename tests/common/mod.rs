//! Shared harness for HTTP-level tests: a full router over a temp metadata
//! store and a seeded sqlite database.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use rusqlite::Connection;
use serde_json::Value;
use tower::ServiceExt;

use sqlgate::config::ServerConfig;
use sqlgate::http_server::{AppState, HttpServer};
use sqlgate::store::MetaStore;

pub struct TestApp {
    pub dir: tempfile::TempDir,
    pub state: AppState,
    pub router: Router,
}

/// Build an app over a temp dir. `dev_mode` controls the admin bypass.
pub fn app(dev_mode: bool) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let metadata_dir = dir.path().join("metadata");
    let store = Arc::new(MetaStore::open(&metadata_dir).unwrap());
    let config = ServerConfig {
        metadata_dir,
        dev_mode,
        ..Default::default()
    };
    let state = AppState::new(store, config);
    let router = HttpServer::new(state.clone()).router();
    TestApp { dir, state, router }
}

/// Create a people database inside the app's temp dir and return its URL.
pub fn seed_people_db(app: &TestApp) -> String {
    let path = app.dir.path().join("people.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER);
         INSERT INTO people (name, age) VALUES ('Alice', 30), ('Bob', 25);",
    )
    .unwrap();
    format!("sqlite:///{}", path.display())
}

/// Fire one request at the router and decode the JSON response.
pub async fn request(
    router: &Router,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Admin POST helper (dev-mode apps need no key).
pub async fn admin_post(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    request(router, "POST", path, &[], Some(body)).await
}

/// Register a connector + query + mapping and deploy it. Returns
/// (connector_id, query_id, mapping_id).
pub async fn publish(
    router: &Router,
    url: &str,
    sql_text: &str,
    path: &str,
    method: &str,
    params: Value,
    extra: Value,
) -> (String, String, String) {
    let (status, connector) = admin_post(
        router,
        "/admin/connectors",
        serde_json::json!({ "name": "db", "connection_url": url }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{:?}", connector);
    let connector_id = connector["id"].as_str().unwrap().to_string();

    let (status, query) = admin_post(
        router,
        "/admin/queries",
        serde_json::json!({
            "connector_id": connector_id,
            "name": "q",
            "sql_text": sql_text,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{:?}", query);
    let query_id = query["id"].as_str().unwrap().to_string();

    let mut mapping_body = serde_json::json!({
        "query_id": query_id,
        "connector_id": connector_id,
        "path": path,
        "method": method,
        "params": params,
    });
    if let (Some(obj), Some(extra_obj)) = (mapping_body.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            obj.insert(k.clone(), v.clone());
        }
    }
    let (status, mapping) = admin_post(router, "/admin/mappings", mapping_body).await;
    assert_eq!(status, StatusCode::OK, "{:?}", mapping);
    let mapping_id = mapping["id"].as_str().unwrap().to_string();

    let (status, deployed) =
        admin_post(router, &format!("/admin/mappings/{}/deploy", mapping_id), Value::Null).await;
    assert_eq!(status, StatusCode::OK, "{:?}", deployed);

    (connector_id, query_id, mapping_id)
}
