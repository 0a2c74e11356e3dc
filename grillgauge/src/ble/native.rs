//! `btleplug` backed transport for real hardware.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::{BATTERY_LEVEL_UUID, ENVIRONMENTAL_TEMPERATURE_UUID, ProbeProfile};
use super::{BleTransport, Capabilities, DiscoveredDevice, GattCharacteristic, TransportError};
use crate::domain::ProbeAddress;

/// How long to wait for the first notification of a notify-only characteristic.
const NOTIFICATION_WINDOW: Duration = Duration::from_secs(2);

/// Scan window used when a device is not yet known to the adapter.
const TARGETED_SCAN_WINDOW: Duration = Duration::from_secs(3);

impl From<btleplug::Error> for TransportError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::TimedOut(_) => TransportError::Timeout,
            other => TransportError::backend(other.to_string()),
        }
    }
}

/// Connected peripheral handle.
pub struct BtleplugSession {
    peripheral: Peripheral,
}

/// Transport over the first local Bluetooth adapter.
pub struct BtleplugTransport {
    // Kept alive for the lifetime of the adapter handle.
    _manager: Manager,
    adapter: Adapter,
    profile: ProbeProfile,
    // The adapter runs one scan at a time; a second `stop_scan` ends the first.
    scan_lock: Mutex<()>,
}

impl BtleplugTransport {
    /// Create a new transport bound to the first available adapter.
    pub async fn new(profile: ProbeProfile) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        match adapter.adapter_info().await {
            Ok(info) => debug!("Using bluetooth adapter {}", info),
            Err(e) => debug!("Could not read adapter info: {}", e),
        }

        Ok(Self {
            _manager: manager,
            adapter,
            profile,
            scan_lock: Mutex::new(()),
        })
    }

    fn characteristic_uuid(&self, characteristic: GattCharacteristic) -> Uuid {
        match characteristic {
            GattCharacteristic::BatteryLevel => BATTERY_LEVEL_UUID,
            GattCharacteristic::EnvironmentalTemperature => ENVIRONMENTAL_TEMPERATURE_UUID,
            GattCharacteristic::ProbeTemperature => self.profile.temperature_characteristic,
        }
    }

    async fn find_peripheral(
        &self,
        address: &ProbeAddress,
    ) -> Result<Option<Peripheral>, TransportError> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral
                .address()
                .to_string()
                .eq_ignore_ascii_case(address.as_str())
            {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    async fn scan_for(&self, duration: Duration) -> Result<(), TransportError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(duration).await;
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        Ok(())
    }

    async fn wait_for_notification(
        &self,
        peripheral: &Peripheral,
        characteristic: &Characteristic,
    ) -> Result<Vec<u8>, TransportError> {
        let mut notifications = peripheral.notifications().await?;
        peripheral.subscribe(characteristic).await?;

        let uuid = characteristic.uuid;
        let first = tokio::time::timeout(NOTIFICATION_WINDOW, async {
            while let Some(notification) = notifications.next().await {
                if notification.uuid == uuid {
                    return Some(notification.value);
                }
            }
            None
        })
        .await;

        if let Err(e) = peripheral.unsubscribe(characteristic).await {
            debug!("Failed to unsubscribe from {}: {}", uuid, e);
        }

        match first {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(TransportError::backend("notification stream closed")),
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

/// Look a device up, running one targeted scan on a miss.
///
/// Scans are serialized through `scan_lock`. A caller that waited for the
/// lock looks again first, so a device found by someone else's scan is not
/// scanned for twice.
async fn find_or_scan<T, Find, FindFut, Scan, ScanFut>(
    scan_lock: &Mutex<()>,
    find: Find,
    scan: Scan,
) -> Result<Option<T>, TransportError>
where
    Find: Fn() -> FindFut,
    FindFut: Future<Output = Result<Option<T>, TransportError>>,
    Scan: FnOnce() -> ScanFut,
    ScanFut: Future<Output = Result<(), TransportError>>,
{
    if let Some(found) = find().await? {
        return Ok(Some(found));
    }

    let _scanning = scan_lock.lock().await;
    if let Some(found) = find().await? {
        return Ok(Some(found));
    }
    scan().await?;
    find().await
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    type Session = BtleplugSession;

    async fn scan(&self, duration: Duration) -> Result<Vec<DiscoveredDevice>, TransportError> {
        {
            let _scanning = self.scan_lock.lock().await;
            self.scan_for(duration).await?;
        }

        let mut devices = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            let raw_address = peripheral.address().to_string();
            let address = match ProbeAddress::new(&raw_address) {
                Ok(address) => address,
                Err(e) => {
                    debug!("Skipping peripheral with unusable address {}: {}", raw_address, e);
                    continue;
                }
            };

            let properties = peripheral.properties().await?;
            devices.push(DiscoveredDevice {
                address,
                local_name: properties.as_ref().and_then(|p| p.local_name.clone()),
                rssi: properties.as_ref().and_then(|p| p.rssi),
            });
        }

        debug!("Scan found {} peripherals", devices.len());
        Ok(devices)
    }

    async fn connect(&self, address: &ProbeAddress) -> Result<Self::Session, TransportError> {
        let peripheral = find_or_scan(
            &self.scan_lock,
            move || self.find_peripheral(address),
            move || async move {
                debug!("{} not cached by adapter, scanning", address);
                self.scan_for(TARGETED_SCAN_WINDOW).await
            },
        )
        .await?
        .ok_or_else(|| TransportError::DeviceNotFound(address.clone()))?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }

        if let Err(e) = peripheral.discover_services().await {
            if let Err(disconnect_err) = peripheral.disconnect().await {
                debug!("Disconnect after failed discovery: {}", disconnect_err);
            }
            return Err(e.into());
        }

        Ok(BtleplugSession { peripheral })
    }

    async fn discover_capabilities(
        &self,
        session: &Self::Session,
    ) -> Result<Capabilities, TransportError> {
        let mut capabilities = Capabilities::default();

        for characteristic in session.peripheral.characteristics() {
            if characteristic.uuid == BATTERY_LEVEL_UUID {
                capabilities.battery_level = true;
            } else if characteristic.uuid == ENVIRONMENTAL_TEMPERATURE_UUID {
                capabilities.environmental_temperature = true;
            } else if characteristic.uuid == self.profile.temperature_characteristic
                && characteristic.service_uuid == self.profile.service
            {
                capabilities.probe_temperature = true;
            }
        }

        Ok(capabilities)
    }

    async fn read_characteristic(
        &self,
        session: &Self::Session,
        characteristic: GattCharacteristic,
    ) -> Result<Vec<u8>, TransportError> {
        let uuid = self.characteristic_uuid(characteristic);
        let target = session
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicUnavailable(characteristic))?;

        if target.properties.contains(CharPropFlags::READ) {
            return Ok(session.peripheral.read(&target).await?);
        }

        if target
            .properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
        {
            return self
                .wait_for_notification(&session.peripheral, &target)
                .await;
        }

        Err(TransportError::CharacteristicUnavailable(characteristic))
    }

    async fn disconnect(&self, session: Self::Session) -> Result<(), TransportError> {
        session.peripheral.disconnect().await?;
        Ok(())
    }
}
