//! Connection lifecycle for a single probe.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, trace};

use crate::ble::protocol::{decode_environmental_temperature, decode_probe_payload, is_plausible};
use crate::ble::{BleTransport, GattCharacteristic, TransportError};
use crate::domain::{ProbeAddress, Sample};

/// Errors produced by [`ProbeLink`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("connection failed after {attempts} attempt(s): {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("read failed: {0}")]
    Read(String),

    #[error("implausible reading: {0}")]
    ImplausibleReading(String),

    #[error("invalid link state: expected connected, was {0}")]
    InvalidState(LinkState),
}

/// Link lifecycle states.
///
/// A failure in any state returns the link to `Disconnected` and bumps the
/// failure counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reading,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
            LinkState::Reading => write!(f, "reading"),
        }
    }
}

/// Timeouts and retry policy for a link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// Additional connect attempts after the first one.
    pub connect_retries: u32,
    /// Pause between connect attempts.
    pub retry_delay: Duration,
    /// Bound on a single characteristic read.
    pub read_timeout: Duration,
    /// Bound on releasing the session.
    pub disconnect_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            connect_retries: 1,
            retry_delay: Duration::from_millis(500),
            read_timeout: Duration::from_secs(3),
            disconnect_timeout: Duration::from_secs(2),
        }
    }
}

/// One physical connection to one probe.
pub struct ProbeLink<T: BleTransport> {
    transport: Arc<T>,
    address: ProbeAddress,
    config: LinkConfig,
    state: LinkState,
    session: Option<T::Session>,
    failures: u32,
}

impl<T: BleTransport> ProbeLink<T> {
    /// Create a new disconnected link.
    pub fn new(transport: Arc<T>, address: ProbeAddress, config: LinkConfig) -> Self {
        Self {
            transport,
            address,
            config,
            state: LinkState::Disconnected,
            session: None,
            failures: 0,
        }
    }

    pub fn address(&self) -> &ProbeAddress {
        &self.address
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Failures recorded over the lifetime of this link.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Connect with bounded retry.
    pub async fn connect(&mut self) -> Result<(), ProbeError> {
        if self.state == LinkState::Connected {
            return Ok(());
        }

        self.state = LinkState::Connecting;
        let max_attempts = self.config.connect_retries.saturating_add(1);
        let mut attempts = 0;

        let last_error = loop {
            attempts += 1;
            let connect = self.transport.connect(&self.address);
            let result = tokio::time::timeout(self.config.connect_timeout, connect)
                .await
                .unwrap_or(Err(TransportError::Timeout));

            let error = match result {
                Ok(session) => {
                    self.session = Some(session);
                    self.state = LinkState::Connected;
                    trace!("Connected to {} on attempt {}", self.address, attempts);
                    return Ok(());
                }
                Err(e) => e,
            };

            if attempts >= max_attempts || !error.is_transient() {
                break error;
            }

            debug!(
                "Connect attempt {}/{} to {} failed: {}",
                attempts, max_attempts, self.address, error
            );
            tokio::time::sleep(self.config.retry_delay).await;
        };

        self.state = LinkState::Disconnected;
        self.failures += 1;
        Err(ProbeError::Connection {
            attempts,
            source: last_error,
        })
    }

    /// Read both temperatures from a connected probe.
    ///
    /// Any failure tears the session down.
    pub async fn read_temperatures(&mut self) -> Result<Sample, ProbeError> {
        if self.state != LinkState::Connected {
            return Err(ProbeError::InvalidState(self.state));
        }
        let Some(session) = self.session.as_ref() else {
            return Err(ProbeError::InvalidState(self.state));
        };

        self.state = LinkState::Reading;
        let result = read_sample(self.transport.as_ref(), session, &self.config).await;

        match result {
            Ok(sample) => {
                self.state = LinkState::Connected;
                Ok(sample)
            }
            Err(e) => {
                self.failures += 1;
                self.disconnect().await;
                Err(e)
            }
        }
    }

    /// Release the session if one is held. Never fails.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            match tokio::time::timeout(
                self.config.disconnect_timeout,
                self.transport.disconnect(session),
            )
            .await
            {
                Ok(Ok(())) => trace!("Disconnected from {}", self.address),
                Ok(Err(e)) => debug!("Disconnect from {} failed: {}", self.address, e),
                Err(_) => debug!("Disconnect from {} timed out", self.address),
            }
        }
        self.state = LinkState::Disconnected;
    }
}

async fn read_characteristic<T: BleTransport>(
    transport: &T,
    session: &T::Session,
    characteristic: GattCharacteristic,
    timeout: Duration,
) -> Result<Vec<u8>, TransportError> {
    tokio::time::timeout(timeout, transport.read_characteristic(session, characteristic))
        .await
        .unwrap_or(Err(TransportError::Timeout))
}

async fn read_sample<T: BleTransport>(
    transport: &T,
    session: &T::Session,
    config: &LinkConfig,
) -> Result<Sample, ProbeError> {
    let probe = read_characteristic(
        transport,
        session,
        GattCharacteristic::ProbeTemperature,
        config.read_timeout,
    )
    .await;

    let sample = match probe {
        Ok(payload) => {
            let reading =
                decode_probe_payload(&payload).map_err(|e| ProbeError::Read(e.to_string()))?;
            Sample::new(Some(reading.meat), Some(reading.grill), Utc::now())
        }
        Err(TransportError::CharacteristicUnavailable(_)) => {
            let payload = read_characteristic(
                transport,
                session,
                GattCharacteristic::EnvironmentalTemperature,
                config.read_timeout,
            )
            .await
            .map_err(|e| ProbeError::Read(e.to_string()))?;
            let celsius = decode_environmental_temperature(&payload)
                .map_err(|e| ProbeError::Read(e.to_string()))?;
            Sample::new(Some(celsius), None, Utc::now())
        }
        Err(e) => return Err(ProbeError::Read(e.to_string())),
    };

    if let Some(value) = sample.temperatures().find(|t| !is_plausible(*t)) {
        return Err(ProbeError::ImplausibleReading(format!("{} °C", value)));
    }

    Ok(sample)
}
