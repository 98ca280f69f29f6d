//! Cryptographic primitives adapter for DoorLink.
//!
//! A thin boundary over the underlying crypto crates so the protocol
//! engines stay algorithm-agnostic. Library failures are wrapped into
//! [`DoorLinkError`] here; nothing above this module sees a foreign
//! error type, and nothing here logs key material.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{
    block_padding::Pkcs7, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
};
use aes::Aes128;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use p256::ecdh;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::types::{
    DoorLinkError, Result, AES_BLOCK_SIZE, CHALLENGE_NONCE_SIZE, GCM_NONCE_SIZE, INFO_I2M,
    INFO_M2I, P256_POINT_SIZE,
};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Fill a buffer with bytes from the OS CSPRNG.
pub fn random_bytes(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Generate a random 16-byte challenge nonce.
pub fn generate_challenge_nonce() -> [u8; CHALLENGE_NONCE_SIZE] {
    let mut nonce = [0u8; CHALLENGE_NONCE_SIZE];
    random_bytes(&mut nonce);
    nonce
}

/// Generate a random 12-byte AES-GCM nonce.
pub fn generate_gcm_nonce() -> [u8; GCM_NONCE_SIZE] {
    let mut nonce = [0u8; GCM_NONCE_SIZE];
    random_bytes(&mut nonce);
    nonce
}

/// Generate a random 16-byte CBC IV.
pub fn generate_iv() -> [u8; AES_BLOCK_SIZE] {
    let mut iv = [0u8; AES_BLOCK_SIZE];
    random_bytes(&mut iv);
    iv
}

/// Parse an uncompressed SEC1 public key, validating curve membership.
///
/// The 0x04 prefix is checked before any point arithmetic so malformed
/// keys are rejected ahead of the expensive path.
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey> {
    if bytes.len() != P256_POINT_SIZE || bytes[0] != 0x04 {
        return Err(DoorLinkError::InvalidPoint);
    }
    PublicKey::from_sec1_bytes(bytes).map_err(|_| DoorLinkError::InvalidPoint)
}

/// Encode a P-256 public key as 65 uncompressed SEC1 bytes.
pub fn encode_public_key(public_key: &PublicKey) -> [u8; P256_POINT_SIZE] {
    let point = public_key.to_encoded_point(false);
    let mut out = [0u8; P256_POINT_SIZE];
    out.copy_from_slice(point.as_bytes());
    out
}

/// Perform P-256 ECDH between our private key and the peer's public key.
///
/// # Returns
/// The 32-byte x-coordinate shared secret
pub fn ecdh_p256(private_key: &SecretKey, peer_public: &PublicKey) -> [u8; 32] {
    let shared = ecdh::diffie_hellman(private_key.to_nonzero_scalar(), peer_public.as_affine());
    let mut out = [0u8; 32];
    out.copy_from_slice(shared.raw_secret_bytes().as_slice());
    out
}

/// Derive bytes via HKDF-SHA-256.
///
/// # Arguments
/// * `ikm` - Input key material
/// * `salt` - Optional salt (the challenge nonce for session keys)
/// * `info` - Domain-separation string
/// * `out` - Output buffer; its length selects the derived size
pub fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) -> Result<()> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
    hkdf.expand(info, out)
        .map_err(|e| DoorLinkError::KeyDerivationFailed(format!("HKDF expand failed: {}", e)))
}

/// Derive the two directional session keys from an ECDH shared secret.
///
/// Both sides call this with the same shared secret and challenge nonce;
/// the info strings give each direction its own key.
///
/// # Returns
/// Tuple of (k_m2i, k_i2m)
pub fn derive_session_keys(
    shared_secret: &[u8; 32],
    challenge_nonce: &[u8; CHALLENGE_NONCE_SIZE],
) -> Result<([u8; 32], [u8; 32])> {
    let mut k_m2i = [0u8; 32];
    let mut k_i2m = [0u8; 32];
    hkdf_sha256(shared_secret, challenge_nonce, INFO_M2I, &mut k_m2i)?;
    hkdf_sha256(shared_secret, challenge_nonce, INFO_I2M, &mut k_i2m)?;
    Ok((k_m2i, k_i2m))
}

/// Encrypt with AES-256-GCM.
///
/// # Returns
/// Ciphertext with the 16-byte tag appended
pub fn aes_gcm_encrypt(
    key: &[u8; 32],
    nonce: &[u8; GCM_NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| DoorLinkError::Internal(format!("GCM cipher init failed: {}", e)))?;
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| DoorLinkError::Internal("GCM encryption failed".to_string()))
}

/// Decrypt with AES-256-GCM.
///
/// Fails with [`DoorLinkError::TagInvalid`] on any mutation of the
/// ciphertext, nonce, AAD, or tag; verification is constant-time and no
/// plaintext is released on failure.
pub fn aes_gcm_decrypt(
    key: &[u8; 32],
    nonce: &[u8; GCM_NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| DoorLinkError::Internal(format!("GCM cipher init failed: {}", e)))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| DoorLinkError::TagInvalid)
}

/// Encrypt with AES-128-CBC and PKCS#7 padding.
pub fn aes_cbc_encrypt(
    key: &[u8; AES_BLOCK_SIZE],
    iv: &[u8; AES_BLOCK_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let encryptor = Aes128CbcEnc::new_from_slices(key, iv)
        .map_err(|e| DoorLinkError::Internal(format!("CBC cipher init failed: {}", e)))?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Decrypt with AES-128-CBC and PKCS#7 padding.
///
/// Fails with [`DoorLinkError::NotBlockAligned`] before touching the
/// cipher if the ciphertext length is wrong, and with
/// [`DoorLinkError::BadPadding`] if the padding does not verify.
pub fn aes_cbc_decrypt(
    key: &[u8; AES_BLOCK_SIZE],
    iv: &[u8; AES_BLOCK_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_SIZE != 0 {
        return Err(DoorLinkError::NotBlockAligned(ciphertext.len()));
    }
    let decryptor = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|e| DoorLinkError::Internal(format!("CBC cipher init failed: {}", e)))?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| DoorLinkError::BadPadding)
}

/// Encrypt a single 16-byte block with AES-128-ECB.
///
/// Used for the Variant-B challenge response `AES(K, nonce)`. Only ever
/// applied to one random block, never to structured data.
pub fn aes_ecb_encrypt_block(
    key: &[u8; AES_BLOCK_SIZE],
    block: &[u8; AES_BLOCK_SIZE],
) -> [u8; AES_BLOCK_SIZE] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);
    let mut out = [0u8; AES_BLOCK_SIZE];
    out.copy_from_slice(&buf);
    out
}
