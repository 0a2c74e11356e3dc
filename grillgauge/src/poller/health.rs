//! Liveness tracking for the polling driver.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::metrics::ComponentHealth;

/// Name under which the poller registers with the health checker.
pub const POLLER_COMPONENT: &str = "poller";

/// Cycles can lag this many intervals before the poller is reported degraded.
const STALL_INTERVALS: u32 = 3;

/// Shared liveness state written by the polling driver.
#[derive(Debug)]
pub struct PollerHealth {
    interval: Duration,
    alive: AtomicBool,
    cycles_started: AtomicU64,
    cycles_completed: AtomicU64,
    last_cycle_completed_at: RwLock<Option<DateTime<Utc>>>,
    stop_reason: RwLock<Option<String>>,
}

impl PollerHealth {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            alive: AtomicBool::new(false),
            cycles_started: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            last_cycle_completed_at: RwLock::new(None),
            stop_reason: RwLock::new(None),
        }
    }

    pub fn record_running(&self) {
        *self.stop_reason.write() = None;
        self.alive.store(true, Ordering::SeqCst);
    }

    pub fn record_cycle_started(&self) {
        self.cycles_started.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_cycle_completed(&self) {
        self.cycles_completed.fetch_add(1, Ordering::SeqCst);
        *self.last_cycle_completed_at.write() = Some(Utc::now());
    }

    /// Mark the driver as no longer running.
    pub fn record_stopped(&self, reason: impl Into<String>) {
        self.alive.store(false, Ordering::SeqCst);
        *self.stop_reason.write() = Some(reason.into());
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn cycles_started(&self) -> u64 {
        self.cycles_started.load(Ordering::SeqCst)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::SeqCst)
    }

    /// Current health of the driver as a component report.
    pub fn component(&self) -> ComponentHealth {
        if let Some(reason) = self.stop_reason.read().clone() {
            return ComponentHealth::unhealthy(POLLER_COMPONENT, reason);
        }
        if !self.is_alive() {
            return ComponentHealth::unknown(POLLER_COMPONENT, "polling loop not started");
        }

        let Some(last) = *self.last_cycle_completed_at.read() else {
            return ComponentHealth::unknown(POLLER_COMPONENT, "waiting for first cycle");
        };

        let stall = self.interval * STALL_INTERVALS;
        let since = (Utc::now() - last).to_std().unwrap_or_default();
        if since > stall {
            return ComponentHealth::degraded(
                POLLER_COMPONENT,
                format!("last cycle completed {}s ago", since.as_secs()),
            );
        }

        ComponentHealth::healthy(POLLER_COMPONENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::HealthStatus;

    #[test]
    fn test_lifecycle() {
        let health = PollerHealth::new(Duration::from_secs(10));
        assert_eq!(health.component().status, HealthStatus::Unknown);

        health.record_running();
        health.record_cycle_started();
        assert_eq!(health.component().status, HealthStatus::Unknown);

        health.record_cycle_completed();
        assert_eq!(health.component().status, HealthStatus::Healthy);
        assert_eq!(health.cycles_started(), 1);
        assert_eq!(health.cycles_completed(), 1);

        health.record_stopped("polling loop panicked: boom");
        let component = health.component();
        assert_eq!(component.status, HealthStatus::Unhealthy);
        assert_eq!(component.message.as_deref(), Some("polling loop panicked: boom"));
        assert!(!health.is_alive());
    }

    #[test]
    fn test_stalled_driver_is_degraded() {
        let health = PollerHealth::new(Duration::from_secs(10));
        health.record_running();
        *health.last_cycle_completed_at.write() = Some(Utc::now() - chrono::Duration::seconds(60));

        assert_eq!(health.component().status, HealthStatus::Degraded);
    }
}
