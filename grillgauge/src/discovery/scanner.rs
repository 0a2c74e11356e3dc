//! One-shot discovery pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::classifier::{Classification, DeviceClassifier, EnumerationError};
use crate::ble::{BleTransport, Capabilities};
use crate::domain::{ProbeAddress, ProbeIdentity};
use crate::registry::RegistryStore;
use crate::Result;

/// Discovery configuration.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// How long to listen for advertisements.
    pub scan_timeout: Duration,
    /// Bound on connecting to a device and on enumerating its services.
    pub enumeration_timeout: Duration,
    pub disconnect_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(10),
            enumeration_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(2),
        }
    }
}

/// What a discovery pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    /// Newly registered probes.
    pub registered: Vec<ProbeIdentity>,
    /// Addresses added to the ignore list.
    pub ignored: Vec<ProbeAddress>,
    /// Addresses whose enumeration failed; retried next pass.
    pub deferred: Vec<ProbeAddress>,
    /// Addresses skipped because they were already registered or ignored.
    pub already_known: Vec<ProbeAddress>,
}

impl DiscoveryReport {
    /// Whether the pass changed the registry.
    pub fn changed(&self) -> bool {
        !self.registered.is_empty() || !self.ignored.is_empty()
    }
}

/// Runs discovery passes against a transport and persists the outcome.
pub struct DiscoveryScanner<T: BleTransport> {
    transport: Arc<T>,
    store: Arc<dyn RegistryStore>,
    classifier: DeviceClassifier,
    config: DiscoveryConfig,
}

impl<T: BleTransport> DiscoveryScanner<T> {
    /// Create a new scanner.
    pub fn new(transport: Arc<T>, store: Arc<dyn RegistryStore>, config: DiscoveryConfig) -> Self {
        Self {
            transport,
            store,
            classifier: DeviceClassifier::new(),
            config,
        }
    }

    /// Run one bounded scan and classify every unseen device.
    ///
    /// Per-device failures never abort the pass. The registry is saved once
    /// at the end if anything changed.
    pub async fn run(&self) -> Result<DiscoveryReport> {
        let mut registry = self.store.load().await?;

        info!("Scanning for BLE devices for {:?}", self.config.scan_timeout);
        let devices = self.transport.scan(self.config.scan_timeout).await?;
        debug!("Scan returned {} devices", devices.len());

        let mut report = DiscoveryReport::default();

        for device in devices {
            let address = device.address.clone();

            if registry.is_known(&address) {
                report.already_known.push(address);
                continue;
            }

            debug!(
                "Inspecting {} ({})",
                device.local_name.as_deref().unwrap_or("unknown"),
                address
            );
            let enumeration = self.enumerate(&address).await;

            match self.classifier.classify(&device, &enumeration) {
                Classification::Candidate(_) => {
                    let identity = ProbeIdentity::new(address, registry.next_probe_name());
                    registry.register(identity.clone(), Some(Utc::now()))?;
                    info!("Added probe {}", identity);
                    report.registered.push(identity);
                }
                Classification::Ignorable => {
                    registry.ignore(address.clone());
                    debug!("Ignoring device {}", address);
                    report.ignored.push(address);
                }
                Classification::Unknown(e) => {
                    warn!("Could not inspect {}, will retry next scan: {}", address, e);
                    report.deferred.push(address);
                }
            }
        }

        if report.changed() {
            self.store.save(&registry).await?;
        }

        info!(
            "Discovery complete: {} registered, {} ignored, {} deferred",
            report.registered.len(),
            report.ignored.len(),
            report.deferred.len()
        );
        Ok(report)
    }

    /// Connect, list capabilities and disconnect.
    async fn enumerate(
        &self,
        address: &ProbeAddress,
    ) -> std::result::Result<Capabilities, EnumerationError> {
        let timeout = self.config.enumeration_timeout;

        let session = tokio::time::timeout(timeout, self.transport.connect(address))
            .await
            .map_err(|_| EnumerationError::Timeout)?
            .map_err(EnumerationError::Connect)?;

        let discover = self.transport.discover_capabilities(&session);
        let capabilities = tokio::time::timeout(timeout, discover)
            .await
            .map_err(|_| EnumerationError::Timeout)
            .and_then(|r| r.map_err(EnumerationError::Discover));

        let disconnect = self.transport.disconnect(session);
        match tokio::time::timeout(self.config.disconnect_timeout, disconnect).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Disconnect from {} failed: {}", address, e),
            Err(_) => debug!("Disconnect from {} timed out", address),
        }

        capabilities
    }
}
