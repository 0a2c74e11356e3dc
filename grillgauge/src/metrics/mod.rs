//! Metrics and monitoring module.
//!
//! Holds per-probe state and renders it for scraping.
//!
//! # Example
//!
//! ```ignore
//! use grillgauge::metrics::{MetricsStore, PrometheusExporter};
//!
//! let store = Arc::new(MetricsStore::new());
//! store.apply_result(&identity, &outcome);
//!
//! let exporter = PrometheusExporter::new(store.clone(), membership_rx);
//! let text = exporter.export();
//! ```

mod health;
mod prometheus;
mod store;

pub use health::{ComponentHealth, HealthCheckFn, HealthChecker, HealthStatus, SystemHealth};
pub use prometheus::{Membership, PrometheusExporter};
pub use store::{MetricsStore, ProbeState, Transition};
