//! iBeacon advertisement payload construction.
//!
//! Builds the Apple manufacturer-specific data block the intercom
//! advertises so mobiles can wake on proximity. One shared UUID per
//! deployment; individual doors are told apart by major/minor, and real
//! identification happens after connect.
//!
//! Payload layout (23 bytes after the company ID):
//! - [0]     type (0x02)
//! - [1]     data length (0x15 = 21)
//! - [2-17]  proximity UUID (big-endian)
//! - [18-19] major (big-endian)
//! - [20-21] minor (big-endian)
//! - [22]    calibrated TX power at 1 m (signed dBm)

use crate::types::{DoorLinkError, Result};

/// Apple's company identifier, transmitted little-endian.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// iBeacon type byte.
pub const IBEACON_TYPE: u8 = 0x02;

/// iBeacon data length byte (21 bytes following).
pub const IBEACON_DATA_LENGTH: u8 = 0x15;

/// Default deployment proximity UUID.
pub const DEFAULT_UUID: &str = "E7B2C021-5D07-4D0B-9C20-223488C8B012";

/// Default calibrated TX power at one meter.
pub const DEFAULT_TX_POWER: i8 = -65;

/// Configuration for one advertised beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconConfig {
    /// Proximity UUID string, with or without hyphens.
    pub uuid: String,
    /// Group identifier.
    pub major: u16,
    /// Device identifier within the group.
    pub minor: u16,
    /// Calibrated TX power at 1 m in dBm.
    pub tx_power: i8,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            uuid: DEFAULT_UUID.to_string(),
            major: 1,
            minor: 1,
            tx_power: DEFAULT_TX_POWER,
        }
    }
}

impl BeaconConfig {
    /// Validate the configuration.
    ///
    /// Major and minor are full-range u16 by construction; the UUID and
    /// TX power still need checking.
    pub fn validate(&self) -> Result<()> {
        uuid_to_bytes(&self.uuid)?;
        if self.tx_power < -127 {
            return Err(DoorLinkError::Internal(format!(
                "TX power must be -127..=127 dBm, got {}",
                self.tx_power
            )));
        }
        Ok(())
    }
}

/// Convert a UUID string to its 16 big-endian bytes.
///
/// Accepts the canonical hyphenated form and the bare 32-hex-digit
/// form.
pub fn uuid_to_bytes(uuid: &str) -> Result<[u8; 16]> {
    let hex_str: String = uuid.chars().filter(|c| *c != '-').collect();
    if hex_str.len() != 32 {
        return Err(DoorLinkError::Internal(format!(
            "UUID must be 32 hex characters, got {}",
            hex_str.len()
        )));
    }
    // Hyphens may only appear at the canonical positions.
    if uuid.len() != 32 && uuid.len() != 36 {
        return Err(DoorLinkError::Internal(
            "UUID must be bare or canonically hyphenated".to_string(),
        ));
    }
    if uuid.len() == 36 {
        for (i, c) in uuid.char_indices() {
            let should_be_hyphen = matches!(i, 8 | 13 | 18 | 23);
            if should_be_hyphen != (c == '-') {
                return Err(DoorLinkError::Internal(
                    "UUID hyphens misplaced".to_string(),
                ));
            }
        }
    }

    let bytes = hex::decode(&hex_str)
        .map_err(|e| DoorLinkError::Internal(format!("Invalid UUID hex: {}", e)))?;
    let mut out = [0u8; 16];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Build the 23-byte iBeacon payload (without the company ID prefix).
pub fn build_payload(config: &BeaconConfig) -> Result<Vec<u8>> {
    config.validate()?;
    let uuid_bytes = uuid_to_bytes(&config.uuid)?;

    let mut payload = Vec::with_capacity(23);
    payload.push(IBEACON_TYPE);
    payload.push(IBEACON_DATA_LENGTH);
    payload.extend_from_slice(&uuid_bytes);
    payload.extend_from_slice(&config.major.to_be_bytes());
    payload.extend_from_slice(&config.minor.to_be_bytes());
    payload.push(config.tx_power as u8);
    Ok(payload)
}

/// Build the manufacturer-specific data pair for the advertising stack:
/// the company ID and the payload it maps to.
pub fn build_manufacturer_data(config: &BeaconConfig) -> Result<(u16, Vec<u8>)> {
    Ok((APPLE_COMPANY_ID, build_payload(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_payload_layout() {
        let payload = build_payload(&BeaconConfig::default()).unwrap();
        assert_eq!(payload.len(), 23);
        assert_eq!(payload[0], IBEACON_TYPE);
        assert_eq!(payload[1], IBEACON_DATA_LENGTH);
        // UUID is big-endian from the string.
        assert_eq!(payload[2], 0xE7);
        assert_eq!(payload[3], 0xB2);
        // Major/minor 1, big-endian.
        assert_eq!(&payload[18..20], &[0x00, 0x01]);
        assert_eq!(&payload[20..22], &[0x00, 0x01]);
        // TX power as signed byte.
        assert_eq!(payload[22] as i8, DEFAULT_TX_POWER);
    }

    #[test]
    fn test_major_minor_encoding() {
        let config = BeaconConfig {
            major: 0x1234,
            minor: 0xABCD,
            ..BeaconConfig::default()
        };
        let payload = build_payload(&config).unwrap();
        assert_eq!(&payload[18..20], &[0x12, 0x34]);
        assert_eq!(&payload[20..22], &[0xAB, 0xCD]);
    }

    #[test]
    fn test_manufacturer_data_company_id() {
        let (company_id, payload) =
            build_manufacturer_data(&BeaconConfig::default()).unwrap();
        assert_eq!(company_id, APPLE_COMPANY_ID);
        assert_eq!(payload.len(), 23);
    }

    #[test]
    fn test_uuid_with_and_without_hyphens() {
        let hyphenated = uuid_to_bytes("A1B2C3D4-E5F6-7890-ABCD-EF1234567890").unwrap();
        let bare = uuid_to_bytes("A1B2C3D4E5F67890ABCDEF1234567890").unwrap();
        assert_eq!(hyphenated, bare);
        assert_eq!(hyphenated[0], 0xA1);
        assert_eq!(hyphenated[15], 0x90);
    }

    #[test]
    fn test_uuid_rejects_bad_input() {
        assert!(uuid_to_bytes("too-short").is_err());
        assert!(uuid_to_bytes("G1B2C3D4-E5F6-7890-ABCD-EF1234567890").is_err());
        assert!(uuid_to_bytes("A1B2C3D4E5F6-7890-ABCD-EF1234567890-").is_err());
    }

    #[test]
    fn test_tx_power_range() {
        let config = BeaconConfig {
            tx_power: -128,
            ..BeaconConfig::default()
        };
        assert!(config.validate().is_err());

        let config = BeaconConfig {
            tx_power: -127,
            ..BeaconConfig::default()
        };
        config.validate().unwrap();
    }
}
