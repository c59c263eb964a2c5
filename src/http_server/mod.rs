//! # HTTP Server Module
//!
//! Combines the fixed admin surface, the health check and the dynamic
//! fallback dispatcher into a unified Axum server.
//!
//! # Endpoints
//!
//! - `/health` - Health check and counters
//! - `/admin/*` - Connector, query, mapping and key management
//! - everything else - dispatched against the live route table

pub mod admin_routes;
pub mod server;

pub use server::HttpServer;

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::metrics::Counters;
use crate::rate_limit::RateLimiter;
use crate::router::RouteManager;
use crate::store::MetaStore;

/// Shared state handed to every handler, admin and dynamic alike.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MetaStore>,
    pub routes: Arc<RouteManager>,
    pub limiter: Arc<RateLimiter>,
    pub counters: Arc<Counters>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(store: Arc<MetaStore>, config: ServerConfig) -> Self {
        let routes = Arc::new(RouteManager::new(store.clone()));
        Self {
            store,
            routes,
            limiter: Arc::new(RateLimiter::new()),
            counters: Arc::new(Counters::new()),
            config: Arc::new(config),
        }
    }
}
