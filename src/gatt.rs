//! GATT profile constants for the Door Access service.
//!
//! The engine itself is transport-agnostic; these are the UUIDs and
//! characteristic roles a BLE integration wires the engine's entry
//! points to.

/// Door Access primary service UUID, advertised in the scan response.
pub const DOOR_SERVICE_UUID: &str = "e7b2c021-5d07-4d0b-9c20-223488c8b012";

/// Challenge characteristic (Read, Notify): the 16-byte live nonce.
pub const CHALLENGE_CHAR_UUID: &str = "e7b2c021-5d07-4d0b-9c20-223488c8b013";

/// Auth characteristic (Write): inbound auth frames, 94..512 bytes.
pub const AUTH_CHAR_UUID: &str = "e7b2c021-5d07-4d0b-9c20-223488c8b014";

/// Response characteristic (Indicate): outbound response frames.
pub const RESPONSE_CHAR_UUID: &str = "e7b2c021-5d07-4d0b-9c20-223488c8b015";

/// 16-bit shorthand IDs used in documentation and packet captures.
pub mod short {
    pub const CHALLENGE: u16 = 0x1235;
    pub const AUTH: u16 = 0x1236;
    pub const RESPONSE: u16 = 0x1237;
}

/// Service UUID for the symmetric-key variant's single-service profile.
pub const CREDENTIAL_SERVICE_UUID: &str = "a1b2c3d4-e5f6-7890-abcd-ef1234567890";

/// Data-transfer characteristic (Write Without Response, Notify) used
/// by both symmetric variants.
pub const DATA_TRANSFER_CHAR_UUID: &str = "b2c3d4e5-f678-90ab-cdef-234567890abc";

/// Client Characteristic Configuration Descriptor.
pub const CCCD_UUID: u16 = 0x2902;

/// Advertised device name.
pub const DEVICE_NAME: &str = "Intercom";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuids_are_well_formed() {
        for uuid in [
            DOOR_SERVICE_UUID,
            CHALLENGE_CHAR_UUID,
            AUTH_CHAR_UUID,
            RESPONSE_CHAR_UUID,
            CREDENTIAL_SERVICE_UUID,
            DATA_TRANSFER_CHAR_UUID,
        ] {
            assert_eq!(uuid.len(), 36);
            assert_eq!(uuid.matches('-').count(), 4);
        }
    }

    #[test]
    fn test_characteristic_uuids_are_distinct() {
        let uuids = [
            DOOR_SERVICE_UUID,
            CHALLENGE_CHAR_UUID,
            AUTH_CHAR_UUID,
            RESPONSE_CHAR_UUID,
        ];
        for (i, a) in uuids.iter().enumerate() {
            for b in &uuids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
