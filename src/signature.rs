//! Ed25519 signature operations for DoorLink.
//!
//! Two users: the issuing authority signs credential records that the
//! intercom verifies, and the signed-challenge demo flow has the mobile
//! sign the published nonce with its enrolled device key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::types::{DoorLinkError, Result, CHALLENGE_NONCE_SIZE};

/// Size of an Ed25519 signature (64 bytes).
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// Sign a byte string with an Ed25519 signing key.
///
/// # Arguments
/// * `message` - The canonical bytes to sign
/// * `signing_key` - The signer's Ed25519 key
///
/// # Returns
/// The Ed25519 signature (64 bytes)
pub fn ed25519_sign(message: &[u8], signing_key: &SigningKey) -> [u8; ED25519_SIGNATURE_SIZE] {
    signing_key.sign(message).to_bytes()
}

/// Verify an Ed25519 signature over a byte string.
///
/// # Returns
/// `true` if the signature is valid
pub fn ed25519_verify(message: &[u8], verifying_key: &VerifyingKey, signature: &[u8]) -> Result<bool> {
    if signature.len() != ED25519_SIGNATURE_SIZE {
        return Err(DoorLinkError::MalformedFrame(format!(
            "Signature must be {} bytes, got {}",
            ED25519_SIGNATURE_SIZE,
            signature.len()
        )));
    }

    let signature_bytes: [u8; ED25519_SIGNATURE_SIZE] = signature
        .try_into()
        .map_err(|_| DoorLinkError::SignatureInvalid)?;
    let signature = Signature::from_bytes(&signature_bytes);

    Ok(verifying_key.verify(message, &signature).is_ok())
}

/// Verify using raw Ed25519 public key bytes.
///
/// # Arguments
/// * `message` - The signed bytes
/// * `public_key` - The Ed25519 public key bytes (32 bytes)
/// * `signature` - The Ed25519 signature (64 bytes)
pub fn ed25519_verify_bytes(message: &[u8], public_key: &[u8], signature: &[u8]) -> Result<bool> {
    if public_key.len() != 32 {
        return Err(DoorLinkError::MalformedFrame(format!(
            "Ed25519 public key must be 32 bytes, got {}",
            public_key.len()
        )));
    }

    let key_bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| DoorLinkError::SignatureInvalid)?;
    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| DoorLinkError::SignatureInvalid)?;

    ed25519_verify(message, &verifying_key, signature)
}

/// Sign a published challenge nonce (signed-challenge demo flow).
///
/// The mobile signs the exact 16 nonce bytes received from the Challenge
/// characteristic; no framing is added.
pub fn sign_challenge(
    nonce: &[u8; CHALLENGE_NONCE_SIZE],
    device_key: &SigningKey,
) -> [u8; ED25519_SIGNATURE_SIZE] {
    ed25519_sign(nonce, device_key)
}

/// Verify a signed challenge against the enrolled device key.
///
/// # Returns
/// `Ok(())` if the signature proves possession of the enrolled key
pub fn verify_challenge(
    nonce: &[u8; CHALLENGE_NONCE_SIZE],
    enrolled_key: &VerifyingKey,
    signature: &[u8],
) -> Result<()> {
    if ed25519_verify(nonce, enrolled_key, signature)? {
        Ok(())
    } else {
        Err(DoorLinkError::SignatureInvalid)
    }
}

/// Generate a human-readable fingerprint for a public key.
///
/// The fingerprint is a truncated SHA-256 hash formatted for easy
/// comparison, and is the only form in which peer keys appear in logs.
///
/// # Returns
/// A fingerprint string like "A7B3 C9D1 E5F2 8A4B"
pub fn fingerprint(public_key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    let hash = hasher.finalize();

    hash.iter()
        .take(8)
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .chunks(2)
        .map(|chunk| chunk.join(""))
        .collect::<Vec<_>>()
        .join(" ")
}
