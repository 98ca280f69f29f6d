//! Key derivation and identity management for DoorLink.
//!
//! Covers the long-lived P-256 identities of both peers, the
//! AN10922-style symmetric key diversification used by the diversified
//! variant, and the HKDF device-key derivation used by the symmetric-key
//! variant.

use std::collections::HashMap;

use aes::Aes128;
use cmac::{Cmac, Mac};
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::crypto::hkdf_sha256;
use crate::types::{
    DoorLinkError, Result, AES_BLOCK_SIZE, DEVICE_ID_SIZE, DEVICE_UID_SIZE, INFO_DEVICE_KEY,
};

/// HKDF info used when stretching a stored seed into a P-256 scalar.
const P256_SEED_INFO: &[u8] = b"p256-identity";

/// Generate a random P-256 key pair.
///
/// # Returns
/// Tuple of (private_key, public_key)
pub fn generate_p256_keypair() -> (SecretKey, PublicKey) {
    let secret = SecretKey::random(&mut OsRng);
    let public = secret.public_key();
    (secret, public)
}

/// Derive a P-256 key pair from a 32-byte seed using HKDF-SHA256.
///
/// Candidate scalars are drawn with an incrementing counter in the info
/// string until one is a valid non-zero scalar below the curve order, so
/// the derivation is deterministic for a given seed.
///
/// # Arguments
/// * `seed` - 32-byte seed (e.g. from the mobile keystore)
pub fn p256_keypair_from_seed(seed: &[u8]) -> Result<(SecretKey, PublicKey)> {
    if seed.len() != 32 {
        return Err(DoorLinkError::KeyDerivationFailed(format!(
            "Seed must be 32 bytes, got {}",
            seed.len()
        )));
    }

    let mut candidate = [0u8; 32];
    for counter in 0u8..=255 {
        let mut info = Vec::with_capacity(P256_SEED_INFO.len() + 1);
        info.extend_from_slice(P256_SEED_INFO);
        info.push(counter);
        hkdf_sha256(seed, &[], &info, &mut candidate)?;

        if let Ok(secret) = SecretKey::from_slice(&candidate) {
            let public = secret.public_key();
            candidate.zeroize();
            return Ok((secret, public));
        }
    }
    candidate.zeroize();

    // 256 consecutive out-of-range scalars do not happen for SHA-256 output.
    Err(DoorLinkError::KeyDerivationFailed(
        "No valid scalar found for seed".to_string(),
    ))
}

/// Diversify a device key from a master key and device UID, AN10922 style.
///
/// `dk = AES-128-CMAC(master, 0x01 || uid)`. Deterministic for a given
/// master/UID pair.
pub fn diversify_key(
    master_key: &[u8; AES_BLOCK_SIZE],
    uid: &[u8; DEVICE_UID_SIZE],
) -> Result<[u8; AES_BLOCK_SIZE]> {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(master_key)
        .map_err(|e| DoorLinkError::KeyDerivationFailed(format!("CMAC init failed: {}", e)))?;

    let mut input = [0u8; 1 + DEVICE_UID_SIZE];
    input[0] = 0x01;
    input[1..].copy_from_slice(uid);
    mac.update(&input);

    let tag = mac.finalize().into_bytes();
    let mut dk = [0u8; AES_BLOCK_SIZE];
    dk.copy_from_slice(&tag);
    Ok(dk)
}

/// Derive a symmetric-demo device key from the master key and device ID.
///
/// `dk = HKDF-SHA-256(ikm = master, salt = device_id, info = "device-key",
/// len = 16)`.
pub fn derive_device_key(
    master_key: &[u8; AES_BLOCK_SIZE],
    device_id: &[u8; DEVICE_ID_SIZE],
) -> Result<[u8; AES_BLOCK_SIZE]> {
    let mut dk = [0u8; AES_BLOCK_SIZE];
    hkdf_sha256(master_key, device_id, INFO_DEVICE_KEY, &mut dk)?;
    Ok(dk)
}

/// Source of per-device keys for the diversified variant.
///
/// Whether a reader stores the master key or a pre-provisioned table of
/// diversified keys is a deployment decision; both live behind this trait.
pub trait KeyProvider: Send + Sync {
    /// Resolve the device key for a UID.
    fn device_key(&self, uid: &[u8; DEVICE_UID_SIZE]) -> Result<[u8; AES_BLOCK_SIZE]>;
}

/// Key provider that holds the master key and diversifies on demand.
pub struct MasterKeyProvider {
    master_key: [u8; AES_BLOCK_SIZE],
}

impl MasterKeyProvider {
    /// Creates a provider from the 16-byte master key.
    pub fn new(master_key: [u8; AES_BLOCK_SIZE]) -> Self {
        Self { master_key }
    }
}

impl Drop for MasterKeyProvider {
    fn drop(&mut self) {
        self.master_key.zeroize();
    }
}

impl KeyProvider for MasterKeyProvider {
    fn device_key(&self, uid: &[u8; DEVICE_UID_SIZE]) -> Result<[u8; AES_BLOCK_SIZE]> {
        diversify_key(&self.master_key, uid)
    }
}

/// Key provider backed by a pre-provisioned table of diversified keys.
///
/// UIDs not present in the table are rejected with `UnknownDevice`.
pub struct ProvisionedKeyProvider {
    keys: HashMap<[u8; DEVICE_UID_SIZE], [u8; AES_BLOCK_SIZE]>,
}

impl ProvisionedKeyProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    /// Adds or replaces the key for a UID.
    pub fn provision(&mut self, uid: [u8; DEVICE_UID_SIZE], key: [u8; AES_BLOCK_SIZE]) {
        self.keys.insert(uid, key);
    }

    /// Removes the key for a UID.
    pub fn revoke(&mut self, uid: &[u8; DEVICE_UID_SIZE]) {
        if let Some(mut key) = self.keys.remove(uid) {
            key.zeroize();
        }
    }
}

impl Default for ProvisionedKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProvisionedKeyProvider {
    fn drop(&mut self) {
        for key in self.keys.values_mut() {
            key.zeroize();
        }
    }
}

impl KeyProvider for ProvisionedKeyProvider {
    fn device_key(&self, uid: &[u8; DEVICE_UID_SIZE]) -> Result<[u8; AES_BLOCK_SIZE]> {
        self.keys
            .get(uid)
            .copied()
            .ok_or(DoorLinkError::UnknownDevice)
    }
}

/// Capability for persisting key material outside the protocol core.
///
/// Mobile keystore/keychain and intercom disk storage both implement
/// this; the engines only see labels and bytes.
pub trait KeyStore: Send + Sync {
    /// Load the bytes stored under a label.
    fn load(&self, label: &str) -> Result<Vec<u8>>;

    /// Store bytes under a label, replacing any previous value.
    fn store(&self, label: &str, bytes: &[u8]) -> Result<()>;

    /// Erase the value under a label.
    fn erase(&self, label: &str) -> Result<()>;
}

/// In-memory key store.
///
/// WARNING: For tests and prototyping only; keys are not protected and
/// are lost when the process exits.
#[derive(Default)]
pub struct InMemoryKeyStore {
    entries: std::sync::Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryKeyStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for InMemoryKeyStore {
    fn load(&self, label: &str) -> Result<Vec<u8>> {
        let entries = self.entries.lock().expect("key store lock poisoned");
        entries
            .get(label)
            .cloned()
            .ok_or_else(|| DoorLinkError::KeyNotFound(label.to_string()))
    }

    fn store(&self, label: &str, bytes: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().expect("key store lock poisoned");
        entries.insert(label.to_string(), bytes.to_vec());
        Ok(())
    }

    fn erase(&self, label: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("key store lock poisoned");
        if let Some(mut bytes) = entries.remove(label) {
            bytes.zeroize();
        }
        Ok(())
    }
}
