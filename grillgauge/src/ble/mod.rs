//! Bluetooth LE transport boundary.
//!
//! The core never talks to a radio directly. Everything that touches a
//! device goes through [`BleTransport`]; [`BtleplugTransport`] drives real
//! hardware and [`MockTransport`] replays scripted devices for tests.

mod mock;
mod native;
pub mod protocol;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ProbeAddress;

pub use self::mock::{ConnectBehavior, MockDevice, MockSession, MockTransport, ReadBehavior};
pub use self::native::{BtleplugSession, BtleplugTransport};
pub use self::protocol::ProbeProfile;

/// Errors surfaced by a transport implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no bluetooth adapter available")]
    NoAdapter,

    #[error("device not found: {0}")]
    DeviceNotFound(ProbeAddress),

    #[error("characteristic not available: {0}")]
    CharacteristicUnavailable(GattCharacteristic),

    #[error("operation timed out")]
    Timeout,

    #[error("bluetooth error: {0}")]
    Backend(String),
}

impl TransportError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Backend(_) | Self::DeviceNotFound(_)
        )
    }
}

/// GATT characteristics the core knows how to interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GattCharacteristic {
    /// Standard battery level (0x2A19).
    BatteryLevel,
    /// Standard environmental sensing temperature (0x2A6E).
    EnvironmentalTemperature,
    /// Vendor probe temperature characteristic.
    ProbeTemperature,
}

impl fmt::Display for GattCharacteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BatteryLevel => write!(f, "battery level"),
            Self::EnvironmentalTemperature => write!(f, "environmental temperature"),
            Self::ProbeTemperature => write!(f, "probe temperature"),
        }
    }
}

/// Capability flags found by enumerating a device's GATT services.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub battery_level: bool,
    pub environmental_temperature: bool,
    pub probe_temperature: bool,
}

impl Capabilities {
    /// Whether the device exposes any temperature source.
    pub fn has_temperature(&self) -> bool {
        self.environmental_temperature || self.probe_temperature
    }

    pub fn supports(&self, characteristic: GattCharacteristic) -> bool {
        match characteristic {
            GattCharacteristic::BatteryLevel => self.battery_level,
            GattCharacteristic::EnvironmentalTemperature => self.environmental_temperature,
            GattCharacteristic::ProbeTemperature => self.probe_temperature,
        }
    }
}

/// A peripheral seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: ProbeAddress,
    /// Advertised local name, if any.
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

/// Device capability interface used by discovery and polling.
///
/// A session represents one live connection. Sessions are consumed by
/// [`disconnect`](BleTransport::disconnect) so a released session can not be
/// reused.
#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    /// Live connection handle.
    type Session: Send + Sync + 'static;

    /// Scan for advertising peripherals for `duration`.
    async fn scan(&self, duration: Duration) -> Result<Vec<DiscoveredDevice>, TransportError>;

    /// Open a connection to the device at `address`.
    async fn connect(&self, address: &ProbeAddress) -> Result<Self::Session, TransportError>;

    /// Enumerate the services of a connected device.
    async fn discover_capabilities(
        &self,
        session: &Self::Session,
    ) -> Result<Capabilities, TransportError>;

    /// Read the raw value of a characteristic.
    async fn read_characteristic(
        &self,
        session: &Self::Session,
        characteristic: GattCharacteristic,
    ) -> Result<Vec<u8>, TransportError>;

    /// Release a connection.
    async fn disconnect(&self, session: Self::Session) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_temperature() {
        let battery_only = Capabilities {
            battery_level: true,
            ..Default::default()
        };
        assert!(!battery_only.has_temperature());

        let probe = Capabilities {
            probe_temperature: true,
            ..Default::default()
        };
        assert!(probe.has_temperature());
        assert!(probe.supports(GattCharacteristic::ProbeTemperature));
        assert!(!probe.supports(GattCharacteristic::EnvironmentalTemperature));
    }

    #[test]
    fn test_transient_errors() {
        assert!(TransportError::Timeout.is_transient());
        assert!(!TransportError::NoAdapter.is_transient());
        assert!(
            !TransportError::CharacteristicUnavailable(GattCharacteristic::BatteryLevel)
                .is_transient()
        );
    }
}
