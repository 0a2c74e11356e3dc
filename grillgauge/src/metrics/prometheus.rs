//! Prometheus metrics exporter.
//!
//! Renders the metrics store in Prometheus text format. Only probes that
//! are currently registered are rendered; states left behind by removed
//! probes stay in the store but are filtered out here.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use tokio::sync::watch;

use super::store::{MetricsStore, ProbeState};
use crate::domain::ProbeIdentity;

/// Shared view of the current registry membership.
pub type Membership = Arc<BTreeSet<ProbeIdentity>>;

/// Prefix of every exported metric name.
const NAMESPACE: &str = "grillgauge";

/// Prometheus metrics exporter.
pub struct PrometheusExporter {
    store: Arc<MetricsStore>,
    membership: watch::Receiver<Membership>,
}

impl PrometheusExporter {
    /// Create a new Prometheus exporter.
    pub fn new(store: Arc<MetricsStore>, membership: watch::Receiver<Membership>) -> Self {
        Self {
            store,
            membership,
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let membership = self.membership.borrow().clone();
        let snapshot = self.store.snapshot();
        let probes: Vec<(&ProbeIdentity, &ProbeState)> = snapshot
            .iter()
            .filter(|(identity, _)| membership.contains(*identity))
            .collect();

        let mut output = String::new();

        self.write_family(
            &mut output,
            "meat_temperature_celsius",
            "Last known meat probe temperature in Celsius",
            probes.iter().filter_map(|(identity, state)| {
                let value = state.last_good_sample?.meat_temperature?;
                Some((*identity, value))
            }),
        );

        self.write_family(
            &mut output,
            "grill_temperature_celsius",
            "Last known grill (ambient) temperature in Celsius",
            probes.iter().filter_map(|(identity, state)| {
                let value = state.last_good_sample?.grill_temperature?;
                Some((*identity, value))
            }),
        );

        self.write_family(
            &mut output,
            "probe_status",
            "Probe status (1 = online, 0 = offline)",
            probes
                .iter()
                .map(|(identity, state)| (*identity, if state.is_online { 1.0 } else { 0.0 })),
        );

        self.write_family(
            &mut output,
            "probe_consecutive_failures",
            "Consecutive failed polls since the last successful read",
            probes
                .iter()
                .map(|(identity, state)| (*identity, f64::from(state.consecutive_failures))),
        );

        self.write_family(
            &mut output,
            "probe_last_sample_timestamp_seconds",
            "Unix time of the last successful read",
            probes.iter().filter_map(|(identity, state)| {
                let sample = state.last_good_sample?;
                Some((*identity, sample.captured_at.timestamp_millis() as f64 / 1000.0))
            }),
        );

        output
    }

    /// Write one gauge family. Families without samples are omitted.
    fn write_family<'a>(
        &self,
        output: &mut String,
        name: &str,
        help: &str,
        samples: impl Iterator<Item = (&'a ProbeIdentity, f64)>,
    ) {
        let full_name = format!("{}_{}", NAMESPACE, name);
        let mut header_written = false;

        for (identity, value) in samples {
            if !header_written {
                let _ = writeln!(output, "# HELP {} {}", full_name, help);
                let _ = writeln!(output, "# TYPE {} gauge", full_name);
                header_written = true;
            }
            let _ = writeln!(output, "{}{{{}}} {}", full_name, probe_labels(identity), value);
        }
    }
}

fn probe_labels(identity: &ProbeIdentity) -> String {
    [
        ("device_address", identity.address.to_string()),
        ("probe_name", identity.name.slug()),
    ]
    .iter()
    .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
    .collect::<Vec<_>>()
    .join(",")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
