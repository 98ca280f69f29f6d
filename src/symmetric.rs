//! Symmetric-key two-round authentication variant.
//!
//! The reader holds a master key and derives a per-device key from the
//! 16-byte device ID via HKDF. One round of encrypted nonce echo proves
//! both sides hold the same device key, then the credential travels
//! under AES-128-CBC. Messages are `[type(1)][payload]` over a single
//! data-transfer characteristic; centrals request an ATT MTU of
//! [`crate::MTU_REQUEST_SYMMETRIC`] before starting.

use crate::crypto::{aes_cbc_decrypt, aes_cbc_encrypt, generate_challenge_nonce, generate_iv};
use crate::keys::derive_device_key;
use crate::types::{
    DoorLinkError, Result, AES_BLOCK_SIZE, CHALLENGE_NONCE_SIZE, DEVICE_ID_SIZE,
};

/// Protocol message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    AuthRequest = 0x01,
    AuthResponse = 0x02,
    Credential = 0x03,
    CredentialResponse = 0x04,
    Error = 0xFF,
}

impl MessageType {
    /// Decode a message type byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::AuthRequest),
            0x02 => Some(Self::AuthResponse),
            0x03 => Some(Self::Credential),
            0x04 => Some(Self::CredentialResponse),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// Credential processing result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CredentialStatus {
    Success = 0x00,
    Rejected = 0x01,
    Expired = 0x02,
    Revoked = 0x03,
    InvalidFormat = 0x04,
}

impl CredentialStatus {
    /// Decode a status byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Success),
            0x01 => Some(Self::Rejected),
            0x02 => Some(Self::Expired),
            0x03 => Some(Self::Revoked),
            0x04 => Some(Self::InvalidFormat),
            _ => None,
        }
    }

    /// User-friendly message.
    pub fn message(self) -> &'static str {
        match self {
            Self::Success => "Access granted",
            Self::Rejected => "Access denied",
            Self::Expired => "Credential expired",
            Self::Revoked => "Credential revoked",
            Self::InvalidFormat => "Invalid credential",
        }
    }
}

/// Plaintext protocol error codes (sent before any session key exists).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    InvalidMessage = 0x01,
    UnknownDevice = 0x02,
    DecryptionFailed = 0x03,
    InvalidState = 0x04,
    AuthFailed = 0x05,
    Timeout = 0x06,
}

impl ErrorCode {
    /// Decode an error code byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::InvalidMessage),
            0x02 => Some(Self::UnknownDevice),
            0x03 => Some(Self::DecryptionFailed),
            0x04 => Some(Self::InvalidState),
            0x05 => Some(Self::AuthFailed),
            0x06 => Some(Self::Timeout),
            _ => None,
        }
    }

    /// User-friendly message.
    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidMessage => "Communication error",
            Self::UnknownDevice => "Device not recognized",
            Self::DecryptionFailed => "Authentication failed",
            Self::InvalidState => "Protocol error",
            Self::AuthFailed => "Authentication failed",
            Self::Timeout => "Reader timeout",
        }
    }
}

/// Size of the encrypted nonce in AUTH_REQUEST: one 16-byte nonce plus a
/// full PKCS#7 padding block.
pub const ENCRYPTED_NONCE_SIZE: usize = 32;

/// Size of the encrypted nonce pair in AUTH_RESPONSE: two nonces plus a
/// full padding block.
pub const ENCRYPTED_NONCES_SIZE: usize = 48;

/// Total AUTH_REQUEST size: type + device ID + IV + encrypted nonce.
pub const AUTH_REQUEST_SIZE: usize = 1 + DEVICE_ID_SIZE + AES_BLOCK_SIZE + ENCRYPTED_NONCE_SIZE;

/// Total AUTH_RESPONSE size: type + IV + encrypted nonce pair.
pub const AUTH_RESPONSE_SIZE: usize = 1 + AES_BLOCK_SIZE + ENCRYPTED_NONCES_SIZE;

fn error_message(code: ErrorCode) -> Vec<u8> {
    vec![MessageType::Error as u8, code as u8]
}

// ============================================================================
// Reader side
// ============================================================================

/// Reader-side protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Connected,
    Authenticating,
    Authenticated,
    Processing,
    Complete,
}

/// Reader-side handler for the two-round flow.
///
/// Fed raw characteristic writes; returns the bytes to notify back.
/// Credential validation is delegated to the caller so the transport
/// and actuation stay outside this module.
pub struct ReaderFlow {
    master_key: [u8; AES_BLOCK_SIZE],
    state: ReaderState,
    device_key: Option<[u8; AES_BLOCK_SIZE]>,
}

impl ReaderFlow {
    /// Creates a flow for one connection.
    pub fn new(master_key: [u8; AES_BLOCK_SIZE]) -> Self {
        Self {
            master_key,
            state: ReaderState::Connected,
            device_key: None,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Process one incoming message and produce the response bytes.
    ///
    /// `validate` is called with the decrypted credential payload once
    /// authentication has succeeded; its status is echoed to the mobile.
    pub fn handle_message(
        &mut self,
        data: &[u8],
        validate: &mut dyn FnMut(&[u8]) -> CredentialStatus,
    ) -> Vec<u8> {
        let Some(msg_type) = data.first().and_then(|b| MessageType::from_byte(*b)) else {
            log::warn!("Unparseable message on data-transfer characteristic");
            return error_message(ErrorCode::InvalidMessage);
        };

        match msg_type {
            MessageType::AuthRequest => self.handle_auth_request(&data[1..]),
            MessageType::Credential => self.handle_credential(&data[1..], validate),
            _ => {
                log::warn!("Unexpected {:?} in state {:?}", msg_type, self.state);
                self.state = ReaderState::Complete;
                error_message(ErrorCode::InvalidState)
            }
        }
    }

    fn handle_auth_request(&mut self, payload: &[u8]) -> Vec<u8> {
        // A second AUTH_REQUEST within the session is a protocol error
        // and closes the flow.
        if self.state != ReaderState::Connected {
            self.state = ReaderState::Complete;
            return error_message(ErrorCode::InvalidState);
        }

        if payload.len() < DEVICE_ID_SIZE + AES_BLOCK_SIZE + ENCRYPTED_NONCE_SIZE {
            return error_message(ErrorCode::InvalidMessage);
        }
        self.state = ReaderState::Authenticating;

        let mut device_id = [0u8; DEVICE_ID_SIZE];
        device_id.copy_from_slice(&payload[..DEVICE_ID_SIZE]);
        let mut iv = [0u8; AES_BLOCK_SIZE];
        iv.copy_from_slice(&payload[DEVICE_ID_SIZE..DEVICE_ID_SIZE + AES_BLOCK_SIZE]);
        let encrypted_nonce = &payload
            [DEVICE_ID_SIZE + AES_BLOCK_SIZE..DEVICE_ID_SIZE + AES_BLOCK_SIZE + ENCRYPTED_NONCE_SIZE];

        let device_key = match derive_device_key(&self.master_key, &device_id) {
            Ok(key) => key,
            Err(_) => {
                self.state = ReaderState::Connected;
                return error_message(ErrorCode::UnknownDevice);
            }
        };

        let nonce_mobile = match aes_cbc_decrypt(&device_key, &iv, encrypted_nonce) {
            Ok(plain) if plain.len() == CHALLENGE_NONCE_SIZE => {
                let mut nonce = [0u8; CHALLENGE_NONCE_SIZE];
                nonce.copy_from_slice(&plain);
                nonce
            }
            _ => {
                log::warn!("AUTH_REQUEST nonce decryption failed");
                self.state = ReaderState::Connected;
                return error_message(ErrorCode::DecryptionFailed);
            }
        };

        let nonce_reader = generate_challenge_nonce();
        self.device_key = Some(device_key);

        // Response: Enc_DK(Nonce_M || Nonce_R).
        let mut combined = [0u8; 2 * CHALLENGE_NONCE_SIZE];
        combined[..CHALLENGE_NONCE_SIZE].copy_from_slice(&nonce_mobile);
        combined[CHALLENGE_NONCE_SIZE..].copy_from_slice(&nonce_reader);

        let response_iv = generate_iv();
        let encrypted = match aes_cbc_encrypt(&device_key, &response_iv, &combined) {
            Ok(ct) => ct,
            Err(_) => {
                self.state = ReaderState::Connected;
                return error_message(ErrorCode::InvalidState);
            }
        };

        self.state = ReaderState::Authenticated;
        log::info!("Mutual authentication round complete");

        let mut response = Vec::with_capacity(AUTH_RESPONSE_SIZE);
        response.push(MessageType::AuthResponse as u8);
        response.extend_from_slice(&response_iv);
        response.extend_from_slice(&encrypted);
        response
    }

    fn handle_credential(
        &mut self,
        payload: &[u8],
        validate: &mut dyn FnMut(&[u8]) -> CredentialStatus,
    ) -> Vec<u8> {
        if self.state != ReaderState::Authenticated {
            self.state = ReaderState::Complete;
            return error_message(ErrorCode::InvalidState);
        }
        let Some(device_key) = self.device_key else {
            return error_message(ErrorCode::InvalidState);
        };

        if payload.len() < AES_BLOCK_SIZE + AES_BLOCK_SIZE {
            return error_message(ErrorCode::InvalidMessage);
        }
        self.state = ReaderState::Processing;

        let mut iv = [0u8; AES_BLOCK_SIZE];
        iv.copy_from_slice(&payload[..AES_BLOCK_SIZE]);

        let credential = match aes_cbc_decrypt(&device_key, &iv, &payload[AES_BLOCK_SIZE..]) {
            Ok(plain) => plain,
            Err(_) => {
                log::warn!("Credential decryption failed");
                self.state = ReaderState::Authenticated;
                return error_message(ErrorCode::DecryptionFailed);
            }
        };

        let status = validate(&credential);
        self.state = ReaderState::Complete;
        log::info!("Credential processed: {:?}", status);

        vec![MessageType::CredentialResponse as u8, status as u8]
    }
}

// ============================================================================
// Mobile side
// ============================================================================

/// Mobile-side driver for the two-round flow.
pub struct MobileFlow {
    device_id: [u8; DEVICE_ID_SIZE],
    device_key: [u8; AES_BLOCK_SIZE],
    nonce_mobile: Option<[u8; CHALLENGE_NONCE_SIZE]>,
}

impl MobileFlow {
    /// Creates a flow with the provisioned device ID and key.
    pub fn new(device_id: [u8; DEVICE_ID_SIZE], device_key: [u8; AES_BLOCK_SIZE]) -> Self {
        Self {
            device_id,
            device_key,
            nonce_mobile: None,
        }
    }

    /// Build the AUTH_REQUEST, remembering Nonce_M for echo verification.
    pub fn build_auth_request(&mut self) -> Result<Vec<u8>> {
        let nonce = generate_challenge_nonce();
        self.build_auth_request_with(nonce)
    }

    /// Build the AUTH_REQUEST from a caller-chosen nonce.
    pub fn build_auth_request_with(
        &mut self,
        nonce: [u8; CHALLENGE_NONCE_SIZE],
    ) -> Result<Vec<u8>> {
        self.nonce_mobile = Some(nonce);
        let iv = generate_iv();
        let encrypted = aes_cbc_encrypt(&self.device_key, &iv, &nonce)?;

        let mut message = Vec::with_capacity(AUTH_REQUEST_SIZE);
        message.push(MessageType::AuthRequest as u8);
        message.extend_from_slice(&self.device_id);
        message.extend_from_slice(&iv);
        message.extend_from_slice(&encrypted);
        Ok(message)
    }

    /// Parse AUTH_RESPONSE and verify the reader echoed our nonce.
    ///
    /// The echo check runs before anything else is sent; a mismatch
    /// means the reader does not hold the device key.
    ///
    /// # Returns
    /// The reader's nonce on success
    pub fn parse_auth_response(&mut self, data: &[u8]) -> Result<[u8; CHALLENGE_NONCE_SIZE]> {
        let expected = self
            .nonce_mobile
            .ok_or_else(|| DoorLinkError::InvalidState("No AUTH_REQUEST in flight".to_string()))?;

        if data.first() == Some(&(MessageType::Error as u8)) {
            let detail = data
                .get(1)
                .and_then(|b| ErrorCode::from_byte(*b))
                .map(ErrorCode::message)
                .unwrap_or("Unknown error");
            return Err(DoorLinkError::InvalidState(detail.to_string()));
        }
        if data.first() != Some(&(MessageType::AuthResponse as u8)) {
            return Err(DoorLinkError::MalformedFrame(
                "Expected AUTH_RESPONSE".to_string(),
            ));
        }
        if data.len() < AUTH_RESPONSE_SIZE {
            return Err(DoorLinkError::MalformedFrame(format!(
                "AUTH_RESPONSE of {} bytes, expected {}",
                data.len(),
                AUTH_RESPONSE_SIZE
            )));
        }

        let mut iv = [0u8; AES_BLOCK_SIZE];
        iv.copy_from_slice(&data[1..1 + AES_BLOCK_SIZE]);
        let encrypted = &data[1 + AES_BLOCK_SIZE..1 + AES_BLOCK_SIZE + ENCRYPTED_NONCES_SIZE];

        let decrypted = aes_cbc_decrypt(&self.device_key, &iv, encrypted)?;
        if decrypted.len() != 2 * CHALLENGE_NONCE_SIZE {
            return Err(DoorLinkError::MalformedFrame(format!(
                "Decrypted nonce pair is {} bytes",
                decrypted.len()
            )));
        }

        if decrypted[..CHALLENGE_NONCE_SIZE] != expected {
            return Err(DoorLinkError::SignatureInvalid);
        }

        let mut nonce_reader = [0u8; CHALLENGE_NONCE_SIZE];
        nonce_reader.copy_from_slice(&decrypted[CHALLENGE_NONCE_SIZE..]);
        Ok(nonce_reader)
    }

    /// Build the CREDENTIAL message.
    pub fn build_credential(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let iv = generate_iv();
        let encrypted = aes_cbc_encrypt(&self.device_key, &iv, payload)?;

        let mut message = Vec::with_capacity(1 + AES_BLOCK_SIZE + encrypted.len());
        message.push(MessageType::Credential as u8);
        message.extend_from_slice(&iv);
        message.extend_from_slice(&encrypted);
        Ok(message)
    }
}

/// Parse a CREDENTIAL_RESPONSE or ERROR message.
///
/// # Returns
/// Tuple of (accepted, user-facing message)
pub fn parse_credential_response(data: &[u8]) -> Result<(bool, &'static str)> {
    match data.first().and_then(|b| MessageType::from_byte(*b)) {
        Some(MessageType::Error) => {
            let detail = data
                .get(1)
                .and_then(|b| ErrorCode::from_byte(*b))
                .map(ErrorCode::message)
                .unwrap_or("Unknown error");
            Ok((false, detail))
        }
        Some(MessageType::CredentialResponse) => {
            let status = data
                .get(1)
                .and_then(|b| CredentialStatus::from_byte(*b))
                .ok_or_else(|| {
                    DoorLinkError::MalformedFrame("Unknown credential status".to_string())
                })?;
            Ok((status == CredentialStatus::Success, status.message()))
        }
        _ => Err(DoorLinkError::MalformedFrame(
            "Unexpected message type".to_string(),
        )),
    }
}
