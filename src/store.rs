//! Storage interfaces for the intercom peripheral.
//!
//! The credential directory caches backend-issued records and is
//! replaced atomically when a cache-refresh notification arrives; the
//! revocation list is the only store consulted on the hot auth path, so
//! it is synchronous.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock as StdRwLock;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::credential::CredentialRecord;
use crate::types::Result;

// ============================================================================
// Revocation list
// ============================================================================

/// Set of revoked credential references.
///
/// Readers take a snapshot for the duration of one verification, so a
/// concurrent `replace` can never expose a half-applied list.
#[derive(Default)]
pub struct RevocationList {
    revoked: StdRwLock<HashSet<[u8; 16]>>,
}

impl RevocationList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a revocation reference is revoked.
    pub fn contains(&self, reference: &[u8; 16]) -> bool {
        self.revoked
            .read()
            .expect("revocation lock poisoned")
            .contains(reference)
    }

    /// Snapshot the current set for one verification pass.
    pub fn snapshot(&self) -> HashSet<[u8; 16]> {
        self.revoked
            .read()
            .expect("revocation lock poisoned")
            .clone()
    }

    /// Add a single revocation.
    pub fn revoke(&self, reference: [u8; 16]) {
        self.revoked
            .write()
            .expect("revocation lock poisoned")
            .insert(reference);
    }

    /// Atomically replace the whole list.
    pub fn replace(&self, references: HashSet<[u8; 16]>) {
        let mut revoked = self.revoked.write().expect("revocation lock poisoned");
        *revoked = references;
    }
}

// ============================================================================
// Credential directory
// ============================================================================

/// Peripheral-side cache of issued credential records.
#[async_trait::async_trait]
pub trait CredentialDirectory: Send + Sync {
    /// Look up a record by credential ID.
    async fn get(&self, credential_id: &[u8; 16]) -> Option<CredentialRecord>;

    /// Atomically replace the cached records (backend cache refresh).
    async fn reload(&self, records: Vec<CredentialRecord>) -> Result<()>;

    /// Number of cached records.
    async fn len(&self) -> usize;

    /// Drop records whose validity (including grace) ended before `now`.
    async fn prune_expired(&self, now: u64) -> Result<()>;
}

/// Entry with an insertion timestamp for staleness reporting.
struct CachedRecord {
    record: CredentialRecord,
    cached_at: Instant,
}

/// In-memory credential directory.
pub struct InMemoryCredentialDirectory {
    records: RwLock<HashMap<[u8; 16], CachedRecord>>,
}

impl InMemoryCredentialDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Age of the oldest cached record, if any.
    pub async fn oldest_entry_age(&self) -> Option<Duration> {
        let records = self.records.read().await;
        let now = Instant::now();
        records
            .values()
            .map(|entry| now.duration_since(entry.cached_at))
            .max()
    }
}

impl Default for InMemoryCredentialDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CredentialDirectory for InMemoryCredentialDirectory {
    async fn get(&self, credential_id: &[u8; 16]) -> Option<CredentialRecord> {
        let records = self.records.read().await;
        records.get(credential_id).map(|entry| entry.record.clone())
    }

    async fn reload(&self, new_records: Vec<CredentialRecord>) -> Result<()> {
        let now = Instant::now();
        let replacement: HashMap<_, _> = new_records
            .into_iter()
            .map(|record| {
                (
                    record.credential_id,
                    CachedRecord {
                        record,
                        cached_at: now,
                    },
                )
            })
            .collect();

        let mut records = self.records.write().await;
        *records = replacement;
        log::info!("Credential directory reloaded: {} records", records.len());
        Ok(())
    }

    async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    async fn prune_expired(&self, now: u64) -> Result<()> {
        let mut records = self.records.write().await;
        records.retain(|_, entry| {
            let deadline = entry
                .record
                .not_after
                .saturating_add(u64::from(entry.record.grace_period));
            deadline >= now
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::PERMISSION_UNLOCK;

    fn record(id: u8, not_after: u64) -> CredentialRecord {
        CredentialRecord {
            credential_id: [id; 16],
            device_public_key: [0x04; 65],
            door_id: [0x0D; 16],
            not_before: 0,
            not_after,
            grace_period: 10,
            permissions: PERMISSION_UNLOCK,
            revocation_ref: [id; 16],
            signature: [0; 64],
        }
    }

    #[test]
    fn test_revocation_list() {
        let list = RevocationList::new();
        assert!(!list.contains(&[0x01; 16]));

        list.revoke([0x01; 16]);
        assert!(list.contains(&[0x01; 16]));
        assert!(list.snapshot().contains(&[0x01; 16]));
    }

    #[test]
    fn test_revocation_replace_is_total() {
        let list = RevocationList::new();
        list.revoke([0x01; 16]);

        let mut replacement = HashSet::new();
        replacement.insert([0x02; 16]);
        list.replace(replacement);

        assert!(!list.contains(&[0x01; 16]));
        assert!(list.contains(&[0x02; 16]));
    }

    #[tokio::test]
    async fn test_directory_reload_replaces_everything() {
        let directory = InMemoryCredentialDirectory::new();
        directory.reload(vec![record(1, 100)]).await.unwrap();
        assert_eq!(directory.len().await, 1);

        directory
            .reload(vec![record(2, 100), record(3, 100)])
            .await
            .unwrap();
        assert_eq!(directory.len().await, 2);
        assert!(directory.get(&[1; 16]).await.is_none());
        assert!(directory.get(&[2; 16]).await.is_some());
    }

    #[tokio::test]
    async fn test_directory_prune_respects_grace() {
        let directory = InMemoryCredentialDirectory::new();
        directory
            .reload(vec![record(1, 100), record(2, 200)])
            .await
            .unwrap();

        // Record 1 is valid through 100 + 10 grace.
        directory.prune_expired(110).await.unwrap();
        assert_eq!(directory.len().await, 2);

        directory.prune_expired(111).await.unwrap();
        assert_eq!(directory.len().await, 1);
        assert!(directory.get(&[2; 16]).await.is_some());
    }
}
