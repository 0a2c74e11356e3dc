//! Device classification.

use thiserror::Error;
use tracing::trace;

use crate::ble::{Capabilities, DiscoveredDevice, TransportError};

/// Why a device's capabilities could not be enumerated.
///
/// Never cached: the device is retried on the next scan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnumerationError {
    #[error("connect failed: {0}")]
    Connect(TransportError),

    #[error("service discovery failed: {0}")]
    Discover(TransportError),

    #[error("enumeration timed out")]
    Timeout,
}

/// Outcome of classifying one discovered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Exposes a temperature source; should be registered.
    Candidate(Capabilities),
    /// Fully enumerated without any temperature source. Terminal.
    Ignorable,
    /// Enumeration failed; decide again on the next scan.
    Unknown(EnumerationError),
}

impl Classification {
    pub fn is_candidate(&self) -> bool {
        matches!(self, Classification::Candidate(_))
    }
}

/// Decides what to do with a discovered peripheral.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceClassifier;

impl DeviceClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a device from its advertisement and enumeration outcome.
    ///
    /// A battery service alone is not enough: the device must expose a
    /// temperature characteristic to be polled.
    pub fn classify(
        &self,
        device: &DiscoveredDevice,
        enumeration: &Result<Capabilities, EnumerationError>,
    ) -> Classification {
        let classification = match enumeration {
            Err(e) => Classification::Unknown(e.clone()),
            Ok(capabilities) if capabilities.has_temperature() => {
                Classification::Candidate(*capabilities)
            }
            Ok(_) => Classification::Ignorable,
        };

        trace!(
            address = %device.address,
            name = device.local_name.as_deref().unwrap_or("<unnamed>"),
            "Classified as {:?}",
            classification
        );
        classification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProbeAddress;

    fn device() -> DiscoveredDevice {
        DiscoveredDevice {
            address: ProbeAddress::new("AA:00:00:00:00:01").unwrap(),
            local_name: Some("grillprobeE".to_string()),
            rssi: None,
        }
    }

    #[test]
    fn test_temperature_device_is_candidate() {
        let classifier = DeviceClassifier::new();
        let env_only = Capabilities {
            environmental_temperature: true,
            ..Default::default()
        };
        let probe = Capabilities {
            battery_level: true,
            probe_temperature: true,
            ..Default::default()
        };

        assert_eq!(
            classifier.classify(&device(), &Ok(env_only)),
            Classification::Candidate(env_only)
        );
        assert!(classifier.classify(&device(), &Ok(probe)).is_candidate());
    }

    #[test]
    fn test_battery_only_is_ignorable() {
        let classifier = DeviceClassifier::new();
        let battery_only = Capabilities {
            battery_level: true,
            ..Default::default()
        };

        assert_eq!(
            classifier.classify(&device(), &Ok(battery_only)),
            Classification::Ignorable
        );
        assert_eq!(
            classifier.classify(&device(), &Ok(Capabilities::default())),
            Classification::Ignorable
        );
    }

    #[test]
    fn test_enumeration_failure_is_unknown() {
        let classifier = DeviceClassifier::new();
        let result = classifier.classify(&device(), &Err(EnumerationError::Timeout));
        assert_eq!(result, Classification::Unknown(EnumerationError::Timeout));
        assert!(!result.is_candidate());
    }
}
