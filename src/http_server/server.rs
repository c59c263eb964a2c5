//! # HTTP Server
//!
//! Main HTTP server combining the admin surface, the health check and the
//! dynamic fallback dispatcher.

use std::net::SocketAddr;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::error::ErrorBody;
use crate::router::pipeline;
use crate::store::{LogRecord, LogStatus};

use super::admin_routes::admin_routes;
use super::AppState;

/// HTTP server over a shared application state
pub struct HttpServer {
    state: AppState,
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let router = Self::build_router(state.clone());
        Self { state, router }
    }

    /// Build the combined router with all endpoints
    fn build_router(state: AppState) -> Router {
        // Permissive CORS unless origins are pinned in the config
        let cors = if state.config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = state
                .config
                .cors_origins
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route("/health", get(health_handler))
            .nest("/admin", admin_routes())
            // Everything else goes through the dynamic route table
            .fallback(pipeline::dispatch)
            .layer(middleware::from_fn_with_state(
                state.clone(),
                log_error_responses,
            ))
            .layer(cors)
            .with_state(state)
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Re-install persisted routes, then bind and serve.
    pub async fn start(self) -> Result<(), std::io::Error> {
        let addr: SocketAddr = self.state.config.socket_addr().parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid listen address: {}", e),
            )
        })?;

        let (installed, skipped) = self.state.routes.redeploy_on_startup();
        println!("Starting sqlgate on {}", addr);
        println!("  re-installed routes: {} (skipped: {})", installed, skipped);
        println!("  admin API:    http://{}/admin", addr);
        println!("  health check: http://{}/health", addr);
        if self.state.config.dev_mode {
            println!("  DEV MODE: admin authentication is bypassed");
        }

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, self.router).await?;

        Ok(())
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let routes = state.routes.installed_routes();
    let live = routes.iter().filter(|r| r.state == "live").count();
    Json(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
        "routes_installed": live,
        "counters": state.counters.snapshot(),
    }))
}

/// Appends a durable log record for every error response, using the body the
/// error conversion stashed in the response extensions.
async fn log_error_responses(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;
    if let Some(body) = response.extensions().get::<ErrorBody>() {
        let record = LogRecord {
            request_id: body.request_id.clone(),
            mapping_id: None,
            time: Utc::now(),
            status: LogStatus::Error,
            duration_ms: None,
            params: None,
            rows_count: None,
            error: Some(body.message.clone()),
            error_code: Some(body.error_code.clone()),
        };
        let _ = state.store.append_log(&record);
    }
    response
}
