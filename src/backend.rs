//! Backend credential-issuance interfaces.
//!
//! The intercom and mobile both talk to an HTTP backend for credential
//! registration and refresh. This module defines the traits and JSON
//! wire records; concrete HTTP clients live outside the protocol core.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::credential::CredentialRecord;
use crate::store::{CredentialDirectory, RevocationList};
use crate::types::{DoorLinkError, Result, P256_POINT_SIZE};

/// Backend connection configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the issuance service.
    pub base_url: String,
    /// Bearer token for authenticated endpoints.
    pub api_token: String,
}

impl BackendConfig {
    /// Creates a configuration.
    pub fn new(base_url: &str, api_token: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_token: api_token.to_string(),
        }
    }

    /// Local development backend.
    pub fn local() -> Self {
        Self::new("http://localhost:8080", "")
    }
}

/// JSON wire form of a credential record.
///
/// Binary fields travel hex- or base64-encoded; `to_record` validates
/// lengths on the way in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRecordWire {
    pub credential_id: String,
    pub device_pub_key: String,
    pub door_id: String,
    pub not_before: u64,
    pub not_after: u64,
    pub grace_period: u32,
    pub permissions: u8,
    pub revocation_ref: String,
    pub signature: String,
}

fn hex_array<const N: usize>(field: &str, value: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(value)
        .map_err(|e| DoorLinkError::InvalidCredential(format!("Bad hex in {}: {}", field, e)))?;
    bytes.try_into().map_err(|_| {
        DoorLinkError::InvalidCredential(format!("{} must be {} bytes", field, N))
    })
}

fn base64_array<const N: usize>(field: &str, value: &str) -> Result<[u8; N]> {
    let bytes = BASE64
        .decode(value)
        .map_err(|e| DoorLinkError::InvalidCredential(format!("Bad base64 in {}: {}", field, e)))?;
    bytes.try_into().map_err(|_| {
        DoorLinkError::InvalidCredential(format!("{} must be {} bytes", field, N))
    })
}

impl CredentialRecordWire {
    /// Encode a binary record for the wire.
    pub fn from_record(record: &CredentialRecord) -> Self {
        Self {
            credential_id: hex::encode(record.credential_id),
            device_pub_key: BASE64.encode(record.device_public_key),
            door_id: hex::encode(record.door_id),
            not_before: record.not_before,
            not_after: record.not_after,
            grace_period: record.grace_period,
            permissions: record.permissions,
            revocation_ref: hex::encode(record.revocation_ref),
            signature: BASE64.encode(record.signature),
        }
    }

    /// Decode into a binary record, validating field lengths.
    pub fn to_record(&self) -> Result<CredentialRecord> {
        Ok(CredentialRecord {
            credential_id: hex_array("credential_id", &self.credential_id)?,
            device_public_key: base64_array::<P256_POINT_SIZE>(
                "device_pub_key",
                &self.device_pub_key,
            )?,
            door_id: hex_array("door_id", &self.door_id)?,
            not_before: self.not_before,
            not_after: self.not_after,
            grace_period: self.grace_period,
            permissions: self.permissions,
            revocation_ref: hex_array("revocation_ref", &self.revocation_ref)?,
            signature: base64_array("signature", &self.signature)?,
        })
    }
}

/// Body of `POST /device/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Base64 of the mobile's uncompressed P-256 public key.
    pub pubkey: String,
    /// Hex SHA-256 enrollment hash from the invite flow.
    pub hash: String,
}

/// Body of `POST /device/refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    #[serde(rename = "accessToolId")]
    pub access_tool_id: String,
}

/// Client for the issuance endpoints.
#[async_trait::async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Register a device key and obtain its first credential.
    async fn register(&self, request: &RegisterRequest) -> Result<CredentialRecordWire>;

    /// Refresh an existing credential.
    async fn refresh(&self, request: &RefreshRequest) -> Result<CredentialRecordWire>;
}

/// Out-of-band cache-refresh notification pushed by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRefresh {
    pub records: Vec<CredentialRecordWire>,
    /// Hex revocation references.
    pub revoked: Vec<String>,
}

impl CacheRefresh {
    /// Apply the refresh: both the credential directory and the
    /// revocation list are replaced wholesale, never patched.
    pub async fn apply(
        &self,
        directory: &dyn CredentialDirectory,
        revocations: &RevocationList,
    ) -> Result<()> {
        let records = self
            .records
            .iter()
            .map(CredentialRecordWire::to_record)
            .collect::<Result<Vec<_>>>()?;

        let revoked = self
            .revoked
            .iter()
            .map(|r| hex_array::<16>("revoked", r))
            .collect::<Result<std::collections::HashSet<_>>>()?;

        directory.reload(records).await?;
        revocations.replace(revoked);
        Ok(())
    }
}
