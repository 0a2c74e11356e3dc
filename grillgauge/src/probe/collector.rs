//! Deadline-bounded sampling of a single probe.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::link::{LinkConfig, ProbeLink};
use super::{Failure, FailureKind, SampleOutcome};
use crate::ble::BleTransport;
use crate::domain::ProbeIdentity;

/// Collector configuration.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Upper bound on connect plus read for one probe.
    pub deadline: Duration,
    pub link: LinkConfig,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(8),
            link: LinkConfig::default(),
        }
    }
}

/// Samples one probe per call.
pub struct SampleCollector<T: BleTransport> {
    transport: Arc<T>,
    config: CollectorConfig,
}

impl<T: BleTransport> Clone for SampleCollector<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T: BleTransport> SampleCollector<T> {
    /// Create a new collector.
    pub fn new(transport: Arc<T>, config: CollectorConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Connect, read and disconnect.
    ///
    /// The session is released on every path, including deadline expiry.
    pub async fn collect(&self, identity: &ProbeIdentity) -> SampleOutcome {
        let mut link = ProbeLink::new(
            self.transport.clone(),
            identity.address.clone(),
            self.config.link.clone(),
        );

        let outcome = tokio::time::timeout(self.config.deadline, async {
            link.connect().await?;
            link.read_temperatures().await
        })
        .await;

        link.disconnect().await;

        match outcome {
            Ok(Ok(sample)) => Ok(sample),
            Ok(Err(e)) => Err(Failure::from_probe_error(identity.clone(), e)),
            Err(_) => {
                debug!("{} exceeded deadline of {:?}", identity, self.config.deadline);
                Err(Failure::new(
                    identity.clone(),
                    FailureKind::DeadlineExceeded,
                    format!("no sample within {:?}", self.config.deadline),
                ))
            }
        }
    }
}
