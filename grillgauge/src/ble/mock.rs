//! Scripted in-memory transport.
//!
//! Devices are registered up front with scripted connect and read
//! behaviors. Each operation pops the next scripted step and falls back to
//! the device default once the script is exhausted.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::protocol::encode_probe_payload;
use super::{BleTransport, Capabilities, DiscoveredDevice, GattCharacteristic, TransportError};
use crate::domain::ProbeAddress;

/// Scripted outcome of a connect attempt.
#[derive(Debug, Clone)]
pub enum ConnectBehavior {
    Accept,
    Fail(TransportError),
    /// Never completes.
    Hang,
}

/// Scripted outcome of a characteristic read.
#[derive(Debug, Clone)]
pub enum ReadBehavior {
    Respond(Vec<u8>),
    Fail(TransportError),
    /// Never completes.
    Hang,
    /// Panics inside the transport call.
    Panic,
}

impl ReadBehavior {
    /// Respond with a probe payload carrying the given temperatures.
    pub fn temperatures(meat: f64, grill: f64) -> Self {
        Self::Respond(encode_probe_payload(meat, grill))
    }
}

/// A simulated peripheral.
#[derive(Debug, Clone)]
pub struct MockDevice {
    address: ProbeAddress,
    local_name: Option<String>,
    capabilities: Capabilities,
    advertising: bool,
    enumeration_error: Option<TransportError>,
    connect_script: VecDeque<ConnectBehavior>,
    default_connect: ConnectBehavior,
    read_script: VecDeque<ReadBehavior>,
    default_read: ReadBehavior,
}

impl MockDevice {
    /// Create a device with no capabilities that accepts connections.
    pub fn new(address: ProbeAddress) -> Self {
        Self {
            address,
            local_name: None,
            capabilities: Capabilities::default(),
            advertising: true,
            enumeration_error: None,
            connect_script: VecDeque::new(),
            default_connect: ConnectBehavior::Accept,
            read_script: VecDeque::new(),
            default_read: ReadBehavior::Fail(TransportError::Timeout),
        }
    }

    /// A grill probe exposing the vendor temperature characteristic and a
    /// battery service.
    pub fn probe(address: ProbeAddress) -> Self {
        Self::new(address)
            .with_name("grillprobeE")
            .with_capabilities(Capabilities {
                battery_level: true,
                environmental_temperature: false,
                probe_temperature: true,
            })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Hide the device from scans and refuse connections.
    pub fn out_of_range(mut self) -> Self {
        self.advertising = false;
        self
    }

    /// Make capability enumeration fail.
    pub fn with_enumeration_error(mut self, error: TransportError) -> Self {
        self.enumeration_error = Some(error);
        self
    }

    /// Queue a connect outcome.
    pub fn then_connect(mut self, behavior: ConnectBehavior) -> Self {
        self.connect_script.push_back(behavior);
        self
    }

    /// Connect outcome once the script is exhausted.
    pub fn connect_by_default(mut self, behavior: ConnectBehavior) -> Self {
        self.default_connect = behavior;
        self
    }

    /// Queue a read outcome.
    pub fn then_read(mut self, behavior: ReadBehavior) -> Self {
        self.read_script.push_back(behavior);
        self
    }

    /// Read outcome once the script is exhausted.
    pub fn read_by_default(mut self, behavior: ReadBehavior) -> Self {
        self.default_read = behavior;
        self
    }

    pub fn address(&self) -> &ProbeAddress {
        &self.address
    }

    fn next_connect(&mut self) -> ConnectBehavior {
        self.connect_script
            .pop_front()
            .unwrap_or_else(|| self.default_connect.clone())
    }

    fn next_read(&mut self) -> ReadBehavior {
        self.read_script
            .pop_front()
            .unwrap_or_else(|| self.default_read.clone())
    }
}

/// Session handle issued by [`MockTransport`].
#[derive(Debug)]
pub struct MockSession {
    id: u64,
    address: ProbeAddress,
}

impl MockSession {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// In-memory [`BleTransport`] driven by [`MockDevice`] scripts.
#[derive(Default)]
pub struct MockTransport {
    devices: Mutex<HashMap<ProbeAddress, MockDevice>>,
    scan_error: Mutex<Option<TransportError>>,
    connect_attempts: Mutex<HashMap<ProbeAddress, usize>>,
    next_session: AtomicU64,
    open_sessions: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport preloaded with devices.
    pub fn with_devices(devices: impl IntoIterator<Item = MockDevice>) -> Self {
        let transport = Self::new();
        for device in devices {
            transport.add_device(device);
        }
        transport
    }

    /// Add or replace a device.
    pub fn add_device(&self, device: MockDevice) {
        self.devices.lock().insert(device.address.clone(), device);
    }

    /// Make every subsequent scan fail with `error`.
    pub fn fail_scans(&self, error: Option<TransportError>) {
        *self.scan_error.lock() = error;
    }

    /// Number of connect attempts made against `address`.
    pub fn connect_attempts(&self, address: &ProbeAddress) -> usize {
        self.connect_attempts
            .lock()
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    /// Sessions that were opened and not yet released.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn device_missing(address: &ProbeAddress) -> TransportError {
        TransportError::DeviceNotFound(address.clone())
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    type Session = MockSession;

    async fn scan(&self, _duration: Duration) -> Result<Vec<DiscoveredDevice>, TransportError> {
        if let Some(error) = self.scan_error.lock().clone() {
            return Err(error);
        }

        let devices = self.devices.lock();
        let mut found: Vec<DiscoveredDevice> = devices
            .values()
            .filter(|d| d.advertising)
            .map(|d| DiscoveredDevice {
                address: d.address.clone(),
                local_name: d.local_name.clone(),
                rssi: Some(-60),
            })
            .collect();
        found.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(found)
    }

    async fn connect(&self, address: &ProbeAddress) -> Result<Self::Session, TransportError> {
        *self
            .connect_attempts
            .lock()
            .entry(address.clone())
            .or_default() += 1;

        let behavior = {
            let mut devices = self.devices.lock();
            match devices.get_mut(address) {
                Some(device) if device.advertising => device.next_connect(),
                _ => return Err(Self::device_missing(address)),
            }
        };

        match behavior {
            ConnectBehavior::Accept => {
                self.open_sessions.fetch_add(1, Ordering::SeqCst);
                Ok(MockSession {
                    id: self.next_session.fetch_add(1, Ordering::SeqCst),
                    address: address.clone(),
                })
            }
            ConnectBehavior::Fail(error) => Err(error),
            ConnectBehavior::Hang => std::future::pending().await,
        }
    }

    async fn discover_capabilities(
        &self,
        session: &Self::Session,
    ) -> Result<Capabilities, TransportError> {
        let devices = self.devices.lock();
        let device = devices
            .get(&session.address)
            .ok_or_else(|| Self::device_missing(&session.address))?;

        match &device.enumeration_error {
            Some(error) => Err(error.clone()),
            None => Ok(device.capabilities),
        }
    }

    async fn read_characteristic(
        &self,
        session: &Self::Session,
        characteristic: GattCharacteristic,
    ) -> Result<Vec<u8>, TransportError> {
        let behavior = {
            let mut devices = self.devices.lock();
            let device = devices
                .get_mut(&session.address)
                .ok_or_else(|| Self::device_missing(&session.address))?;

            if !device.capabilities.supports(characteristic) {
                return Err(TransportError::CharacteristicUnavailable(characteristic));
            }
            if characteristic == GattCharacteristic::BatteryLevel {
                return Ok(vec![100]);
            }
            device.next_read()
        };

        match behavior {
            ReadBehavior::Respond(payload) => Ok(payload),
            ReadBehavior::Fail(error) => Err(error),
            ReadBehavior::Hang => std::future::pending().await,
            ReadBehavior::Panic => panic!("scripted panic reading {}", session.address),
        }
    }

    async fn disconnect(&self, _session: Self::Session) -> Result<(), TransportError> {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> ProbeAddress {
        ProbeAddress::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_scripted_reads_fall_back_to_default() {
        let address = addr("AA:00:00:00:00:01");
        let transport = MockTransport::with_devices([MockDevice::probe(address.clone())
            .then_read(ReadBehavior::temperatures(55.0, 180.0))
            .read_by_default(ReadBehavior::Fail(TransportError::Timeout))]);

        let session = transport.connect(&address).await.unwrap();
        let first = transport
            .read_characteristic(&session, GattCharacteristic::ProbeTemperature)
            .await
            .unwrap();
        assert_eq!(first, encode_probe_payload(55.0, 180.0));

        let second = transport
            .read_characteristic(&session, GattCharacteristic::ProbeTemperature)
            .await;
        assert_eq!(second, Err(TransportError::Timeout));

        assert_eq!(transport.open_sessions(), 1);
        transport.disconnect(session).await.unwrap();
        assert_eq!(transport.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_device() {
        let address = addr("AA:00:00:00:00:02");
        let transport =
            MockTransport::with_devices([MockDevice::probe(address.clone()).out_of_range()]);

        assert!(transport.scan(Duration::from_secs(1)).await.unwrap().is_empty());
        assert!(matches!(
            transport.connect(&address).await,
            Err(TransportError::DeviceNotFound(_))
        ));
        assert_eq!(transport.connect_attempts(&address), 1);
    }

    #[tokio::test]
    async fn test_unsupported_characteristic() {
        let address = addr("AA:00:00:00:00:03");
        let transport = MockTransport::with_devices([MockDevice::new(address.clone())]);

        let session = transport.connect(&address).await.unwrap();
        let result = transport
            .read_characteristic(&session, GattCharacteristic::ProbeTemperature)
            .await;
        assert_eq!(
            result,
            Err(TransportError::CharacteristicUnavailable(
                GattCharacteristic::ProbeTemperature
            ))
        );
    }
}
