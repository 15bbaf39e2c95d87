//! Credential storage contract
//!
//! The verifiers only talk to storage through [`CredentialStore`]. Every
//! mutation is a single-key atomic operation: insert-if-absent on attestation
//! and compare-and-swap of the counter on assertion. [`KeyLocks`] linearizes
//! the read-verify-write sequence per key identifier so unrelated keys never
//! contend.

mod locks;
mod memory;

pub use locks::{KeyGuard, KeyLocks};
pub use memory::MemoryCredentialStore;

use crate::models::Credential;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("credential {0} already exists")]
    DuplicateKey(String),
    #[error("credential {0} does not exist")]
    UnknownKey(String),
    #[error("counter for {key_id} is {actual}, expected {expected}")]
    CounterConflict {
        key_id: String,
        expected: u32,
        actual: u32,
    },
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

/// Durable mapping from key identifier to verified credential
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch a credential, revoked or not
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the backend cannot be reached
    async fn get(&self, key_id: &str) -> Result<Option<Credential>, StoreError>;

    /// Store a new credential
    ///
    /// When `replace` is false an existing entry for the same key id is left
    /// untouched and `DuplicateKey` is returned.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` or `Unavailable`
    async fn insert(&self, credential: Credential, replace: bool) -> Result<(), StoreError>;

    /// Advance the counter from `expected` to `new` in one atomic step
    ///
    /// # Errors
    ///
    /// Returns `UnknownKey` for absent or revoked credentials and
    /// `CounterConflict` if the stored counter is no longer `expected`
    async fn compare_and_swap_counter(
        &self,
        key_id: &str,
        expected: u32,
        new: u32,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Mark a credential revoked; later assertions for it fail
    ///
    /// # Errors
    ///
    /// Returns `UnknownKey` if the credential does not exist
    async fn revoke(&self, key_id: &str) -> Result<(), StoreError>;

    /// Number of stored credentials
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
