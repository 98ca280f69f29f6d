//! Type definitions and protocol constants for DoorLink.

use thiserror::Error;

/// Protocol version byte (Variant A frames).
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of a challenge nonce in bytes.
pub const CHALLENGE_NONCE_SIZE: usize = 16;

/// Size of an AES-GCM per-frame nonce in bytes.
pub const GCM_NONCE_SIZE: usize = 12;

/// Size of an AES-GCM authentication tag in bytes.
pub const GCM_TAG_SIZE: usize = 16;

/// Size of an uncompressed P-256 public key in bytes (0x04 || X || Y).
pub const P256_POINT_SIZE: usize = 65;

/// Size of an AES-128 key, block, and IV in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// Size of a Variant-B device UID in bytes.
pub const DEVICE_UID_SIZE: usize = 8;

/// Size of a symmetric-demo device ID in bytes.
pub const DEVICE_ID_SIZE: usize = 16;

/// Minimum Variant-A auth frame length: version + point + nonce + tag.
pub const AUTH_FRAME_MIN: usize = 1 + P256_POINT_SIZE + GCM_NONCE_SIZE + GCM_TAG_SIZE;

/// Maximum Variant-A auth frame length.
pub const AUTH_FRAME_MAX: usize = 512;

/// Maximum Variant-A response frame length.
pub const RESPONSE_FRAME_MAX: usize = 256;

/// Maximum Variant-B link frame value length.
pub const LINK_VALUE_MAX: usize = 400;

/// Minimum ATT MTU the ECDH variant asks for.
pub const MTU_FLOOR_ECDH: usize = 247;

/// ATT MTU requested when running the ECDH variant: the 247 floor
/// raised so a full-size auth frame fits in one write.
pub const MTU_REQUEST_ECDH: usize = AUTH_FRAME_MAX + 3;

/// ATT MTU requested by the symmetric-key variants.
pub const MTU_REQUEST_SYMMETRIC: usize = 512;

/// Challenge nonce lifetime in seconds.
pub const NONCE_LIFETIME_SECS: u64 = 30;

/// HKDF info string for the mobile-to-intercom session key.
pub const INFO_M2I: &[u8] = b"m2i-enc";

/// HKDF info string for the intercom-to-mobile session key.
pub const INFO_I2M: &[u8] = b"i2m-enc";

/// HKDF info string for symmetric-demo device key derivation.
pub const INFO_DEVICE_KEY: &[u8] = b"device-key";

/// Response status byte sent in the Variant-A response body and the
/// symmetric-variant CREDENTIAL_RESPONSE message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0x00,
    AuthFailed = 0x01,
    Expired = 0x02,
    NotYetValid = 0x03,
    Revoked = 0x04,
    WrongDoor = 0x05,
    PermissionDenied = 0x06,
    RateLimited = 0x07,
    Jammed = 0x08,
    InternalError = 0x09,
    ChallengeExpired = 0x0A,
}

impl StatusCode {
    /// Decode a status byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Success),
            0x01 => Some(Self::AuthFailed),
            0x02 => Some(Self::Expired),
            0x03 => Some(Self::NotYetValid),
            0x04 => Some(Self::Revoked),
            0x05 => Some(Self::WrongDoor),
            0x06 => Some(Self::PermissionDenied),
            0x07 => Some(Self::RateLimited),
            0x08 => Some(Self::Jammed),
            0x09 => Some(Self::InternalError),
            0x0A => Some(Self::ChallengeExpired),
            _ => None,
        }
    }

    /// Encode as the wire byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Human-readable message for the mobile UI.
    pub fn message(self) -> &'static str {
        match self {
            Self::Success => "Access granted",
            Self::AuthFailed => "Authentication failed",
            Self::Expired => "Credential expired",
            Self::NotYetValid => "Credential not yet valid",
            Self::Revoked => "Credential revoked",
            Self::WrongDoor => "Credential is for a different door",
            Self::PermissionDenied => "Access denied",
            Self::RateLimited => "Too many attempts, try again later",
            Self::Jammed => "Door mechanism fault",
            Self::InternalError => "Reader error",
            Self::ChallengeExpired => "Challenge expired, reconnect",
        }
    }
}

/// Reported door state byte in the Variant-A response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DoorState {
    Unknown = 0x00,
    Locked = 0x01,
    Unlocked = 0x02,
    Ajar = 0x03,
    Forced = 0x04,
}

impl DoorState {
    /// Decode a door-state byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Unknown),
            0x01 => Some(Self::Locked),
            0x02 => Some(Self::Unlocked),
            0x03 => Some(Self::Ajar),
            0x04 => Some(Self::Forced),
            _ => None,
        }
    }

    /// Encode as the wire byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Errors that can occur during DoorLink protocol operations.
#[derive(Error, Debug)]
pub enum DoorLinkError {
    // Transport
    /// Frame failed structural validation.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame or field exceeds the negotiated MTU.
    #[error("Frame of {0} bytes exceeds MTU budget of {1}")]
    MtuExceeded(usize, usize),

    /// Sequence number is not the expected successor.
    #[error("Sequence violation: expected {expected}, got {got}")]
    SequenceViolation { expected: u8, got: u8 },

    /// Message arrived in a protocol phase that does not accept it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Crypto
    /// Peer public key is not a valid P-256 curve point.
    #[error("Invalid P-256 point")]
    InvalidPoint,

    /// AEAD tag verification failed.
    #[error("Authentication tag invalid")]
    TagInvalid,

    /// CBC padding was malformed after decryption.
    #[error("Bad padding")]
    BadPadding,

    /// CBC ciphertext is not a whole number of blocks.
    #[error("Ciphertext of {0} bytes is not block aligned")]
    NotBlockAligned(usize),

    /// Signature did not verify.
    #[error("Signature invalid")]
    SignatureInvalid,

    /// Key derivation failed.
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // Policy
    /// Credential failed structural parsing.
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Credential validity window has passed.
    #[error("Credential expired")]
    Expired,

    /// Credential validity window has not started.
    #[error("Credential not yet valid")]
    NotYetValid,

    /// Credential is on the revocation list.
    #[error("Credential revoked")]
    Revoked,

    /// Credential audience does not match this door.
    #[error("Credential is for a different door")]
    WrongDoor,

    /// Credential does not permit the requested action.
    #[error("Permission denied")]
    PermissionDenied,

    /// Peer exceeded the auth attempt budget.
    #[error("Rate limited")]
    RateLimited,

    /// Device UID is not in the allowlist.
    #[error("Unknown device")]
    UnknownDevice,

    // Runtime
    /// Challenge nonce expired before the auth frame arrived.
    #[error("Challenge expired")]
    ChallengeExpired,

    /// A session is already active.
    #[error("Busy: a session is already active")]
    Busy,

    /// Door actuator reported a mechanical fault.
    #[error("Actuator fault: {0}")]
    ActuatorFault(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Key not found in the key store.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Operation timed out waiting for the peer.
    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),
}

impl DoorLinkError {
    /// Map this error to the one-byte status surface of the response frame.
    ///
    /// Transport and crypto failures collapse onto `AuthFailed` so the wire
    /// never reveals which stage rejected the attempt; policy and runtime
    /// outcomes keep their distinct codes.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Expired => StatusCode::Expired,
            Self::NotYetValid => StatusCode::NotYetValid,
            Self::Revoked => StatusCode::Revoked,
            Self::WrongDoor => StatusCode::WrongDoor,
            Self::PermissionDenied => StatusCode::PermissionDenied,
            Self::RateLimited => StatusCode::RateLimited,
            Self::ChallengeExpired => StatusCode::ChallengeExpired,
            Self::ActuatorFault(_) => StatusCode::Jammed,
            Self::Internal(_) | Self::KeyNotFound(_) => StatusCode::InternalError,
            _ => StatusCode::AuthFailed,
        }
    }
}

pub type Result<T> = std::result::Result<T, DoorLinkError>;
