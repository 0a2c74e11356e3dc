//! HTTP API: the Prometheus scrape endpoint and health checks.

pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
