//! GATT identifiers and payload decoding for the grillprobeE family.

use thiserror::Error;
use uuid::Uuid;

pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
pub const ENVIRONMENTAL_SENSING_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000181a_0000_1000_8000_00805f9b34fb);
pub const ENVIRONMENTAL_TEMPERATURE_UUID: Uuid =
    Uuid::from_u128(0x00002a6e_0000_1000_8000_00805f9b34fb);

pub const DEFAULT_PROBE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000fb00_0000_1000_8000_00805f9b34fb);
pub const DEFAULT_PROBE_TEMPERATURE_UUID: Uuid =
    Uuid::from_u128(0x0000fb02_0000_1000_8000_00805f9b34fb);

/// Minimum length of a probe temperature notification.
pub const PROBE_PAYLOAD_LEN: usize = 7;

/// Readings outside this range are treated as sensor faults.
pub const MIN_PLAUSIBLE_CELSIUS: f64 = -40.0;
pub const MAX_PLAUSIBLE_CELSIUS: f64 = 500.0;

/// Raw probe values are tenths of a degree offset by 40 °C.
const PROBE_SCALE: f64 = 10.0;
const PROBE_OFFSET: f64 = 40.0;

/// Environmental sensing temperature is in hundredths of a degree.
const ENVIRONMENTAL_SCALE: f64 = 100.0;

/// Vendor service and characteristic identifiers for a probe model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeProfile {
    pub service: Uuid,
    pub temperature_characteristic: Uuid,
}

impl Default for ProbeProfile {
    fn default() -> Self {
        Self {
            service: DEFAULT_PROBE_SERVICE_UUID,
            temperature_characteristic: DEFAULT_PROBE_TEMPERATURE_UUID,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

/// Decoded probe notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReading {
    pub meat: f64,
    pub grill: f64,
}

/// Decode a probe temperature payload.
///
/// Layout: bytes 2..4 meat, 4..6 grill, both little-endian `i16`.
pub fn decode_probe_payload(payload: &[u8]) -> Result<ProbeReading, PayloadError> {
    if payload.len() < PROBE_PAYLOAD_LEN {
        return Err(PayloadError::TooShort {
            expected: PROBE_PAYLOAD_LEN,
            actual: payload.len(),
        });
    }

    let meat_raw = i16::from_le_bytes([payload[2], payload[3]]);
    let grill_raw = i16::from_le_bytes([payload[4], payload[5]]);

    Ok(ProbeReading {
        meat: f64::from(meat_raw) / PROBE_SCALE - PROBE_OFFSET,
        grill: f64::from(grill_raw) / PROBE_SCALE - PROBE_OFFSET,
    })
}

/// Encode a probe payload for the given temperatures.
///
/// Used by the mock transport to script devices.
pub fn encode_probe_payload(meat: f64, grill: f64) -> Vec<u8> {
    let encode = |celsius: f64| ((celsius + PROBE_OFFSET) * PROBE_SCALE).round() as i16;

    let mut payload = vec![0u8; PROBE_PAYLOAD_LEN];
    payload[2..4].copy_from_slice(&encode(meat).to_le_bytes());
    payload[4..6].copy_from_slice(&encode(grill).to_le_bytes());
    payload
}

/// Decode an environmental sensing temperature value (0x2A6E).
pub fn decode_environmental_temperature(payload: &[u8]) -> Result<f64, PayloadError> {
    if payload.len() < 2 {
        return Err(PayloadError::TooShort {
            expected: 2,
            actual: payload.len(),
        });
    }

    let raw = i16::from_le_bytes([payload[0], payload[1]]);
    Ok(f64::from(raw) / ENVIRONMENTAL_SCALE)
}

pub fn is_plausible(celsius: f64) -> bool {
    celsius.is_finite() && (MIN_PLAUSIBLE_CELSIUS..=MAX_PLAUSIBLE_CELSIUS).contains(&celsius)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_probe_payload() {
        let payload = [0x00, 0x00, 0xB6, 0x03, 0x98, 0x08, 0x00];
        let reading = decode_probe_payload(&payload).unwrap();
        assert!((reading.meat - 55.0).abs() < 1e-9);
        assert!((reading.grill - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_encode_matches_known_payload() {
        assert_eq!(
            encode_probe_payload(55.0, 180.0),
            vec![0x00, 0x00, 0xB6, 0x03, 0x98, 0x08, 0x00]
        );
    }

    #[test]
    fn test_decode_short_payload() {
        let err = decode_probe_payload(&[0x00, 0x00, 0xB6]).unwrap_err();
        assert_eq!(
            err,
            PayloadError::TooShort {
                expected: 7,
                actual: 3
            }
        );
    }

    #[test]
    fn test_decode_negative_raw() {
        // raw -10 -> -1.0 - 40 = -41.0
        let mut payload = encode_probe_payload(0.0, 0.0);
        payload[2..4].copy_from_slice(&(-10i16).to_le_bytes());
        let reading = decode_probe_payload(&payload).unwrap();
        assert!((reading.meat + 41.0).abs() < 1e-9);
        assert!(!is_plausible(reading.meat));
    }

    #[test]
    fn test_decode_environmental_temperature() {
        // 2150 hundredths
        let value = decode_environmental_temperature(&[0x66, 0x08]).unwrap();
        assert!((value - 21.5).abs() < 1e-9);
        assert!(decode_environmental_temperature(&[0x66]).is_err());
    }

    #[test]
    fn test_plausible_range() {
        assert!(is_plausible(-40.0));
        assert!(is_plausible(500.0));
        assert!(!is_plausible(500.1));
        assert!(!is_plausible(f64::NAN));
        assert!(!is_plausible(f64::INFINITY));
    }

    #[test]
    fn test_uuid_strings() {
        assert_eq!(
            DEFAULT_PROBE_TEMPERATURE_UUID.to_string(),
            "0000fb02-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            BATTERY_LEVEL_UUID.to_string(),
            "00002a19-0000-1000-8000-00805f9b34fb"
        );
    }
}
