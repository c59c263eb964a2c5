//! sqlgate - publish stored SQL queries as live HTTP endpoints
//!
//! Connectors, saved queries and route mappings are persisted as JSON
//! metadata; deployed mappings become live handlers that can be installed,
//! replaced and retracted at runtime without a restart.

pub mod auth;
pub mod cli;
pub mod config;
pub mod discover;
pub mod error;
pub mod exec;
pub mod http_server;
pub mod metrics;
pub mod params;
pub mod rate_limit;
pub mod router;
pub mod store;
