//! Health check implementation.
//!
//! Health reports process liveness, not probe health: a poller whose probes
//! are all offline is still healthy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Still serving, with a problem worth reporting.
    Degraded,
    Unhealthy,
    /// The polling loop has not finished its first cycle.
    #[default]
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One entry under `components` in the `/health` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    /// Why the component is not healthy, when it isn't.
    pub message: Option<String>,
    /// RFC 3339.
    pub last_check: Option<String>,
    pub check_duration_ms: Option<u64>,
}

impl ComponentHealth {
    fn with_status(name: impl Into<String>, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message,
            last_check: Some(chrono::Utc::now().to_rfc3339()),
            check_duration_ms: None,
        }
    }

    pub fn healthy(name: impl Into<String>) -> Self {
        Self::with_status(name, HealthStatus::Healthy, None)
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(name, HealthStatus::Unhealthy, Some(message.into()))
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(name, HealthStatus::Degraded, Some(message.into()))
    }

    /// Create a component that has not reported yet.
    pub fn unknown(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(name, HealthStatus::Unknown, Some(message.into()))
    }

    /// Set the check duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.check_duration_ms = Some(duration.as_millis() as u64);
        self
    }
}

/// Body of `/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    /// Worst status across `components`.
    pub status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub version: String,
    pub uptime_secs: u64,
    pub timestamp: String,
}

impl SystemHealth {
    /// Degraded still counts as ready.
    pub fn is_ready(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Health check function type.
pub type HealthCheckFn = Arc<dyn Fn() -> ComponentHealth + Send + Sync>;

/// Aggregates registered component checks.
pub struct HealthChecker {
    checks: RwLock<HashMap<String, HealthCheckFn>>,
    start_time: Instant,
    version: String,
}

impl HealthChecker {
    /// Create a new health checker.
    pub fn new() -> Self {
        Self {
            checks: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Register a health check.
    pub async fn register(&self, name: impl Into<String>, check: HealthCheckFn) {
        self.checks.write().await.insert(name.into(), check);
    }

    /// Run all health checks.
    ///
    /// Any unhealthy component makes the system unhealthy; a component that
    /// has not reported yet keeps the system out of the healthy state.
    pub async fn check_all(&self) -> SystemHealth {
        let checks = self.checks.read().await;
        let mut components = HashMap::new();
        let mut overall_status = HealthStatus::Healthy;

        for (name, check) in checks.iter() {
            let start = Instant::now();
            let health = check().with_duration(start.elapsed());

            overall_status = match (overall_status, health.status) {
                (_, HealthStatus::Unhealthy) | (HealthStatus::Unhealthy, _) => {
                    HealthStatus::Unhealthy
                }
                (_, HealthStatus::Unknown) | (HealthStatus::Unknown, _) => HealthStatus::Unknown,
                (_, HealthStatus::Degraded) | (HealthStatus::Degraded, _) => {
                    HealthStatus::Degraded
                }
                _ => HealthStatus::Healthy,
            };

            components.insert(name.clone(), health);
        }

        SystemHealth {
            status: overall_status,
            components,
            version: self.version.clone(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Check readiness.
    pub async fn check_ready(&self) -> bool {
        self.check_all().await.is_ready()
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_checks_is_healthy() {
        let checker = HealthChecker::new();
        let health = checker.check_all().await;
        assert!(health.is_healthy());
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_component_is_not_ready() {
        let checker = HealthChecker::new();
        checker
            .register("poller", Arc::new(|| ComponentHealth::unknown("poller", "starting")))
            .await;

        let health = checker.check_all().await;
        assert_eq!(health.status, HealthStatus::Unknown);
        assert!(!health.is_ready());
    }

    #[tokio::test]
    async fn test_unhealthy_wins() {
        let checker = HealthChecker::new();
        checker
            .register("a", Arc::new(|| ComponentHealth::degraded("a", "slow")))
            .await;
        checker
            .register("b", Arc::new(|| ComponentHealth::unhealthy("b", "dead")))
            .await;

        let health = checker.check_all().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(!checker.check_ready().await);
    }

    #[test]
    fn test_health_status_serialization() {
        let json = serde_json::to_string(&HealthStatus::Healthy).unwrap();
        assert_eq!(json, "\"healthy\"");
    }
}
