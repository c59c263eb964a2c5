//! Route-table behavior over the HTTP surface: idempotent deploys, 410
//! stubs, cascade retraction, uniqueness, pagination and rate limits.

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::{admin_post, app, publish, request, seed_people_db};

#[tokio::test]
async fn test_unknown_route_is_404_with_error_body() {
    let app = app(true);
    let (status, body) = request(&app.router, "GET", "/nothing/here", &[], None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "NOT_FOUND");
    assert!(body["request_id"].as_str().is_some());
}

#[tokio::test]
async fn test_undeployed_route_returns_410() {
    let app = app(true);
    let url = seed_people_db(&app);
    let (_, _, mapping_id) = publish(
        &app.router,
        &url,
        "SELECT name FROM people",
        "/people/all",
        "GET",
        json!([]),
        json!({}),
    )
    .await;

    let (status, _) = request(&app.router, "GET", "/people/all", &[], None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = admin_post(
        &app.router,
        &format!("/admin/mappings/{}/undeploy", mapping_id),
        json!(null),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(&app.router, "GET", "/people/all", &[], None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error_code"], "GONE");

    // Redeploying replaces the stub with a live handler again.
    let (status, deployed) = admin_post(
        &app.router,
        &format!("/admin/mappings/{}/deploy", mapping_id),
        json!(null),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deployed["status"], "deployed");
    let (status, _) = request(&app.router, "GET", "/people/all", &[], None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_deploy_is_idempotent_over_http() {
    let app = app(true);
    let url = seed_people_db(&app);
    let (_, _, mapping_id) = publish(
        &app.router,
        &url,
        "SELECT name FROM people",
        "/people/all",
        "GET",
        json!([]),
        json!({}),
    )
    .await;

    let (status, body) = admin_post(
        &app.router,
        &format!("/admin/mappings/{}/deploy", mapping_id),
        json!(null),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "already_deployed");
}

#[tokio::test]
async fn test_duplicate_path_method_is_rejected() {
    let app = app(true);
    let url = seed_people_db(&app);
    let (connector_id, query_id, _) = publish(
        &app.router,
        &url,
        "SELECT name FROM people",
        "/people/all",
        "GET",
        json!([]),
        json!({}),
    )
    .await;

    let (status, body) = admin_post(
        &app.router,
        "/admin/mappings",
        json!({
            "query_id": query_id,
            "connector_id": connector_id,
            "path": "/people/all",
            "method": "GET",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "CONFLICT");

    // Same path under a different method is fine.
    let (status, _) = admin_post(
        &app.router,
        "/admin/mappings",
        json!({
            "query_id": query_id,
            "connector_id": connector_id,
            "path": "/people/all",
            "method": "POST",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_validation_failures_are_400() {
    let app = app(true);
    let url = seed_people_db(&app);
    publish(
        &app.router,
        &url,
        "SELECT name FROM people WHERE age >= :age",
        "/people/adults",
        "GET",
        json!([{ "name": "age", "in": "query", "type": "integer", "min": 0 }]),
        json!({}),
    )
    .await;

    let (status, body) = request(&app.router, "GET", "/people/adults", &[], None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "VALIDATION_ERROR");
    assert!(body["message"].as_str().unwrap().contains("age"));

    let (status, _) = request(&app.router, "GET", "/people/adults?age=abc", &[], None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request(&app.router, "GET", "/people/adults?age=-1", &[], None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = request(&app.router, "GET", "/people/adults?age=18", &[], None).await;
    assert_eq!(status, StatusCode::OK, "{:?}", body);
}

#[tokio::test]
async fn test_limit_clamp_and_offset() {
    let app = app(true);
    let url = seed_people_db(&app);
    {
        let path = url.strip_prefix("sqlite:///").unwrap();
        let conn = rusqlite::Connection::open(path).unwrap();
        for i in 0..148 {
            conn.execute(
                "INSERT INTO people (name, age) VALUES (?1, ?2)",
                (format!("p{}", i), i),
            )
            .unwrap();
        }
    }

    publish(
        &app.router,
        &url,
        "SELECT id FROM people ORDER BY id",
        "/people/page",
        "GET",
        json!([]),
        json!({}),
    )
    .await;

    // limit above the cap is clamped to 100
    let (status, body) = request(&app.router, "GET", "/people/page?limit=500", &[], None).await;
    assert_eq!(status, StatusCode::OK, "{:?}", body);
    assert_eq!(body["result"]["rows"].as_array().unwrap().len(), 100);
    assert_eq!(body["result"]["more"], true);
    // truncation is also surfaced at the top level of the response
    assert_eq!(body["more"], true);

    // offset pages past the first rows
    let (_, body) = request(
        &app.router,
        "GET",
        "/people/page?limit=5&offset=145",
        &[],
        None,
    )
    .await;
    let rows = body["result"]["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0]["id"], 146);

    // pagination fields never reach the SQL binder
    let (_, log_probe) = request(&app.router, "GET", "/people/page?limit=3", &[], None).await;
    assert_eq!(log_probe["result"]["rows"].as_array().unwrap().len(), 3);

    // a final page that fits under the limit is not flagged as truncated
    let (_, body) = request(
        &app.router,
        "GET",
        "/people/page?limit=100&offset=100",
        &[],
        None,
    )
    .await;
    assert_eq!(body["result"]["rows"].as_array().unwrap().len(), 50);
    assert_eq!(body["result"]["more"], false);
    assert!(body.get("more").is_none());
}

#[tokio::test]
async fn test_header_parameter_binds() {
    let app = app(true);
    let url = seed_people_db(&app);
    publish(
        &app.router,
        &url,
        "SELECT name, age FROM people WHERE name = :subject",
        "/people/by-name",
        "GET",
        json!([{ "name": "subject", "in": "header", "type": "string" }]),
        json!({}),
    )
    .await;

    let (status, body) = request(
        &app.router,
        "GET",
        "/people/by-name",
        &[("subject", "Bob")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{:?}", body);
    let rows = body["result"]["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "Bob");

    // the header is a declared source, so omitting it fails validation
    let (status, body) = request(&app.router, "GET", "/people/by-name", &[], None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "VALIDATION_ERROR");

    // query string outranks the header when both carry the value
    let (status, body) = request(
        &app.router,
        "GET",
        "/people/by-name?subject=Alice",
        &[("subject", "Bob")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["rows"][0]["name"], "Alice");
}

#[tokio::test]
async fn test_auth_required_route() {
    let app = app(true);
    let url = seed_people_db(&app);
    publish(
        &app.router,
        &url,
        "SELECT name FROM people",
        "/secure/people",
        "GET",
        json!([]),
        json!({ "auth_required": true }),
    )
    .await;

    // Dev mode bypasses admin auth, never runtime auth.
    let (status, body) = request(&app.router, "GET", "/secure/people", &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "UNAUTHORIZED");

    let token = sqlgate::auth::issue_key(&app.state.store, sqlgate::store::Role::Consumer).unwrap();
    let (status, _) = request(
        &app.router,
        "GET",
        "/secure/people",
        &[("x-api-key", token.as_str())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limited_route() {
    let app = app(true);
    let url = seed_people_db(&app);
    publish(
        &app.router,
        &url,
        "SELECT name FROM people",
        "/limited",
        "GET",
        json!([]),
        json!({ "rate_limit": { "limit": 2, "window_seconds": 60 } }),
    )
    .await;

    for _ in 0..2 {
        let (status, _) = request(&app.router, "GET", "/limited", &[], None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = request(&app.router, "GET", "/limited", &[], None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error_code"], "RATE_LIMITED");
}

#[tokio::test]
async fn test_connector_deletion_cascades() {
    let app = app(true);
    let url = seed_people_db(&app);
    let (connector_id, _, mapping_id) = publish(
        &app.router,
        &url,
        "SELECT name FROM people",
        "/people/all",
        "GET",
        json!([]),
        json!({}),
    )
    .await;

    let (status, body) = request(
        &app.router,
        "DELETE",
        &format!("/admin/connectors/{}", connector_id),
        &[],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["retracted_mappings"][0], mapping_id);

    // The live route became a stub and the mapping cannot be redeployed.
    let (status, _) = request(&app.router, "GET", "/people/all", &[], None).await;
    assert_eq!(status, StatusCode::GONE);

    let (status, body) = admin_post(
        &app.router,
        &format!("/admin/mappings/{}/deploy", mapping_id),
        json!(null),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "CONFLICT");
}

#[tokio::test]
async fn test_query_deletion_cascades() {
    let app = app(true);
    let url = seed_people_db(&app);
    let (_, query_id, mapping_id) = publish(
        &app.router,
        &url,
        "SELECT name FROM people",
        "/people/all",
        "GET",
        json!([]),
        json!({}),
    )
    .await;

    let (status, body) = request(
        &app.router,
        "DELETE",
        &format!("/admin/queries/{}", query_id),
        &[],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["retracted_mappings"][0], mapping_id);

    let (status, _) = request(&app.router, "GET", "/people/all", &[], None).await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn test_mapping_deletion_removes_and_stubs() {
    let app = app(true);
    let url = seed_people_db(&app);
    let (_, _, mapping_id) = publish(
        &app.router,
        &url,
        "SELECT name FROM people",
        "/people/all",
        "GET",
        json!([]),
        json!({}),
    )
    .await;

    let (status, _) = request(
        &app.router,
        "DELETE",
        &format!("/admin/mappings/{}", mapping_id),
        &[],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(&app.router, "GET", "/people/all", &[], None).await;
    assert_eq!(status, StatusCode::GONE);

    let (status, mappings) = request(&app.router, "GET", "/admin/mappings", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mappings["mappings"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_debug_routes_snapshot() {
    let app = app(true);
    let url = seed_people_db(&app);
    let (_, _, mapping_id) = publish(
        &app.router,
        &url,
        "SELECT name FROM people",
        "/people/all",
        "GET",
        json!([]),
        json!({}),
    )
    .await;

    let (status, body) = request(&app.router, "GET", "/admin/debug/routes", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    let routes = body["routes"].as_array().unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0]["state"], "live");
    assert_eq!(routes[0]["mapping_id"], Value::String(mapping_id));
    assert_eq!(routes[0]["method"], "GET");
}
