use super::{CredentialStore, StoreError};
use crate::models::Credential;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process credential store
///
/// Each operation takes the write lock for its whole read-modify-write, which
/// gives the single-key atomicity the trait requires.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<HashMap<String, Credential>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key_id: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.credentials.read().await.get(key_id).cloned())
    }

    async fn insert(&self, credential: Credential, replace: bool) -> Result<(), StoreError> {
        let mut credentials = self.credentials.write().await;
        if !replace && credentials.contains_key(&credential.key_id) {
            return Err(StoreError::DuplicateKey(credential.key_id));
        }
        credentials.insert(credential.key_id.clone(), credential);
        Ok(())
    }

    async fn compare_and_swap_counter(
        &self,
        key_id: &str,
        expected: u32,
        new: u32,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut credentials = self.credentials.write().await;
        let credential = credentials
            .get_mut(key_id)
            .filter(|c| !c.revoked)
            .ok_or_else(|| StoreError::UnknownKey(key_id.to_string()))?;

        if credential.counter != expected {
            return Err(StoreError::CounterConflict {
                key_id: key_id.to_string(),
                expected,
                actual: credential.counter,
            });
        }

        credential.counter = new;
        credential.last_used = Some(used_at);
        Ok(())
    }

    async fn revoke(&self, key_id: &str) -> Result<(), StoreError> {
        let mut credentials = self.credentials.write().await;
        let credential = credentials
            .get_mut(key_id)
            .ok_or_else(|| StoreError::UnknownKey(key_id.to_string()))?;
        credential.revoked = true;
        Ok(())
    }

    async fn len(&self) -> usize {
        self.credentials.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppEnvironment, AppIdentity};

    fn credential(key_id: &str) -> Credential {
        let app = AppIdentity::new("TEAMID1234", "com.example.app", AppEnvironment::Development);
        Credential::attested(key_id, vec![4u8; 65], Vec::new(), &app, Utc::now())
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryCredentialStore::new();
        assert!(store.is_empty().await);

        store.insert(credential("k1"), false).await.unwrap();
        let stored = store.get("k1").await.unwrap().unwrap();
        assert_eq!(stored.counter, 0);
        assert_eq!(stored.app_id, "TEAMID1234.com.example.app");
        assert!(store.get("k2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_leaves_original() {
        let store = MemoryCredentialStore::new();
        store.insert(credential("k1"), false).await.unwrap();
        store
            .compare_and_swap_counter("k1", 0, 3, Utc::now())
            .await
            .unwrap();

        let err = store.insert(credential("k1"), false).await.unwrap_err();
        assert_eq!(err, StoreError::DuplicateKey("k1".to_string()));
        assert_eq!(store.get("k1").await.unwrap().unwrap().counter, 3);

        store.insert(credential("k1"), true).await.unwrap();
        assert_eq!(store.get("k1").await.unwrap().unwrap().counter, 0);
    }

    #[tokio::test]
    async fn test_compare_and_swap_counter() {
        let store = MemoryCredentialStore::new();
        store.insert(credential("k1"), false).await.unwrap();

        store
            .compare_and_swap_counter("k1", 0, 1, Utc::now())
            .await
            .unwrap();
        let err = store
            .compare_and_swap_counter("k1", 0, 2, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::CounterConflict {
                key_id: "k1".to_string(),
                expected: 0,
                actual: 1
            }
        );

        let stored = store.get("k1").await.unwrap().unwrap();
        assert_eq!(stored.counter, 1);
        assert!(stored.last_used.is_some());
    }

    #[tokio::test]
    async fn test_revoked_credential_rejects_counter_update() {
        let store = MemoryCredentialStore::new();
        store.insert(credential("k1"), false).await.unwrap();
        store.revoke("k1").await.unwrap();

        let err = store
            .compare_and_swap_counter("k1", 0, 1, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::UnknownKey("k1".to_string()));
        assert!(store.get("k1").await.unwrap().unwrap().revoked);
        assert!(store.revoke("missing").await.is_err());
    }
}
