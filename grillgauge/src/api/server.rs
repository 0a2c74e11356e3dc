//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::extract::Request;
use axum::http::Response;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::metrics::{HealthChecker, PrometheusExporter};
use crate::{Error, Result};

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl ApiServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid address: {}", e)))
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    /// Renders `/metrics`
    pub exporter: Arc<PrometheusExporter>,
    /// Backs `/health`
    pub health_checker: Arc<HealthChecker>,
}

impl AppState {
    pub fn new(exporter: Arc<PrometheusExporter>, health_checker: Arc<HealthChecker>) -> Self {
        Self {
            start_time: Instant::now(),
            exporter,
            health_checker,
        }
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    /// Create a new API server.
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Create a server that stops when `cancel_token` is cancelled.
    pub fn with_cancel_token(
        config: ApiServerConfig,
        state: AppState,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone()).layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    // Scrapes and health probes arrive every few seconds.
                    if is_quiet_path(req.uri().path()) {
                        Span::none()
                    } else {
                        tracing::info_span!("http", method = %req.method(), uri = %req.uri())
                    }
                })
                .on_response(|res: &Response<Body>, latency: Duration, span: &Span| {
                    if span.is_disabled() {
                        return;
                    }
                    tracing::info!(
                        status = %res.status(),
                        latency_ms = latency.as_millis() as u64,
                        "response"
                    );
                }),
        )
    }

    /// Start the server and run until cancelled.
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.socket_addr()?;
        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("API server listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await
            .map_err(|e| Error::Other(format!("Server error: {}", e)))?;

        Ok(())
    }
}

fn is_quiet_path(path: &str) -> bool {
    path == "/metrics" || path == "/health" || path.starts_with("/health/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_paths() {
        assert!(is_quiet_path("/metrics"));
        assert!(is_quiet_path("/health"));
        assert!(is_quiet_path("/health/ready"));
        assert!(!is_quiet_path("/healthz"));
        assert!(!is_quiet_path("/"));
    }

    #[test]
    fn test_config_defaults() {
        let config = ApiServerConfig::default();
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.port, 8000);
        assert_eq!(config.socket_addr().unwrap().port(), 8000);
    }

    #[test]
    fn test_invalid_bind_address() {
        let config = ApiServerConfig {
            bind_address: "not an address".to_string(),
            port: 8000,
        };
        assert!(matches!(config.socket_addr(), Err(Error::Configuration(_))));
    }
}
