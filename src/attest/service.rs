//! App Attest service
//!
//! Wires the challenge issuer, the credential store and both verifiers into
//! the two flows clients drive: register a key with an attestation, then
//! prove possession of it with assertions. All state changes happen at the
//! end of a flow under the key's lock, so a rejected request leaves neither
//! a credential nor a consumed challenge behind.

use super::assertion::AssertionVerifier;
use super::attestation::{decode_key_id, AttestationVerifier};
use super::certificate::TrustAnchor;
use super::errors::VerificationError;
use crate::challenge::{Challenge, ChallengeIssuer};
use crate::models::{Credential, CounterPolicy};
use crate::settings::DeviceCheckSettings;
use crate::store::{CredentialStore, KeyLocks, MemoryCredentialStore};
use crate::utils::logging::LoggingHelper;
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, Utc};
use std::path::Path;
use std::sync::Arc;

pub struct AppAttestService {
    issuer: ChallengeIssuer,
    store: Arc<dyn CredentialStore>,
    locks: KeyLocks,
    attestation: AttestationVerifier,
    assertion: AssertionVerifier,
    counter_policy: CounterPolicy,
    allow_reregistration: bool,
}

fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>, VerificationError> {
    if value.is_empty() {
        return Err(VerificationError::InvalidInput(format!("{field} is empty")));
    }
    STANDARD
        .decode(value)
        .map_err(|_| VerificationError::InvalidInput(format!("{field} is not valid base64")))
}

impl AppAttestService {
    #[must_use]
    pub fn new(
        attestation: AttestationVerifier,
        store: Arc<dyn CredentialStore>,
        issuer: ChallengeIssuer,
    ) -> Self {
        Self {
            issuer,
            store,
            locks: KeyLocks::new(),
            attestation,
            assertion: AssertionVerifier::new(),
            counter_policy: CounterPolicy::default(),
            allow_reregistration: false,
        }
    }

    #[must_use]
    pub fn with_counter_policy(mut self, policy: CounterPolicy) -> Self {
        self.counter_policy = policy;
        self
    }

    #[must_use]
    pub fn with_reregistration(mut self, allow: bool) -> Self {
        self.allow_reregistration = allow;
        self
    }

    /// Build the service with an in-memory store
    ///
    /// # Errors
    ///
    /// Returns an error if the trust anchor cannot be loaded
    pub fn from_settings(settings: &DeviceCheckSettings) -> anyhow::Result<Self> {
        let anchor = match &settings.app_attest.root_ca_path {
            Some(path) => TrustAnchor::from_file(Path::new(path))
                .with_context(|| format!("Failed to load App Attest root CA from {path}"))?,
            None => TrustAnchor::apple().context("Failed to load bundled Apple root CA")?,
        };
        let app = settings.app_identity();
        log::info!(
            "App Attest configured for {} ({})",
            app.app_id(),
            app.environment
        );

        Ok(Self::new(
            AttestationVerifier::new(anchor, app),
            Arc::new(MemoryCredentialStore::new()),
            ChallengeIssuer::new(Duration::seconds(settings.app_attest.challenge_ttl_seconds)),
        )
        .with_counter_policy(settings.app_attest.counter_policy)
        .with_reregistration(settings.app_attest.allow_reregistration))
    }

    #[must_use]
    pub fn issuer(&self) -> &ChallengeIssuer {
        &self.issuer
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// # Errors
    ///
    /// Returns `Storage` if the random source fails
    pub fn issue_challenge(&self, session_id: Option<&str>) -> Result<Challenge, VerificationError> {
        let challenge = self.issuer.issue(session_id)?;
        LoggingHelper::log_challenge_issued(&challenge.id, session_id);
        Ok(challenge)
    }

    /// Verify an attestation and register the attested key
    ///
    /// `attestation` and `challenge` are standard base64 as submitted by the
    /// client.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput`, `ChallengeExpiredOrUsed`, `DuplicateKey`,
    /// `AttestationInvalid` or `Storage`
    pub async fn register(
        &self,
        key_id: &str,
        attestation: &str,
        challenge: &str,
    ) -> Result<Credential, VerificationError> {
        self.register_for_session(key_id, attestation, challenge, None)
            .await
    }

    /// [`Self::register`] for a client that names the session it requested
    /// the challenge for
    ///
    /// # Errors
    ///
    /// As [`Self::register`]; a challenge bound to another session is
    /// `ChallengeExpiredOrUsed`
    pub async fn register_for_session(
        &self,
        key_id: &str,
        attestation: &str,
        challenge: &str,
        session_id: Option<&str>,
    ) -> Result<Credential, VerificationError> {
        let result = self
            .register_inner(key_id, attestation, challenge, session_id)
            .await;
        match &result {
            Ok(credential) => LoggingHelper::log_attestation_accepted(key_id, &credential.app_id),
            Err(e) => LoggingHelper::log_verification_failure("attestation", key_id, e),
        }
        result
    }

    async fn register_inner(
        &self,
        key_id: &str,
        attestation: &str,
        challenge: &str,
        session_id: Option<&str>,
    ) -> Result<Credential, VerificationError> {
        decode_key_id(key_id)?;
        let attestation_bytes = decode_base64("attestation", attestation)?;
        let challenge_bytes = decode_base64("challenge", challenge)?;

        self.issuer.check_in_session(challenge, session_id)?;
        self.ensure_unregistered(key_id).await?;

        let now = Utc::now();
        let verified = self
            .attestation
            .verify(key_id, &attestation_bytes, &challenge_bytes, now)?;

        let _guard = self.locks.lock(key_id).await;
        self.ensure_unregistered(key_id).await?;
        self.issuer.consume_in_session(challenge, session_id)?;

        let credential = Credential::attested(
            key_id,
            verified.public_key,
            verified.receipt,
            self.attestation.app(),
            now,
        );
        self.store
            .insert(credential.clone(), self.allow_reregistration)
            .await?;
        Ok(credential)
    }

    async fn ensure_unregistered(&self, key_id: &str) -> Result<(), VerificationError> {
        if !self.allow_reregistration && self.store.get(key_id).await?.is_some() {
            return Err(VerificationError::DuplicateKey(key_id.to_string()));
        }
        Ok(())
    }

    /// Verify an assertion and advance the key's counter
    ///
    /// `assertion` and `client_data` are standard base64. Returns the
    /// accepted counter.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput`, `UnknownKey`, `AssertionInvalid`,
    /// `ReplayDetected`, `ChallengeExpiredOrUsed` or `Storage`
    pub async fn assert(
        &self,
        key_id: &str,
        assertion: &str,
        client_data: &str,
    ) -> Result<u32, VerificationError> {
        self.assert_for_session(key_id, assertion, client_data, None)
            .await
    }

    /// [`Self::assert`] for a client that names the session it requested
    /// the embedded challenge for
    ///
    /// # Errors
    ///
    /// As [`Self::assert`]; a challenge bound to another session is
    /// `ChallengeExpiredOrUsed`
    pub async fn assert_for_session(
        &self,
        key_id: &str,
        assertion: &str,
        client_data: &str,
        session_id: Option<&str>,
    ) -> Result<u32, VerificationError> {
        let result = self
            .assert_inner(key_id, assertion, client_data, session_id)
            .await;
        match &result {
            Ok(counter) => LoggingHelper::log_assertion_accepted(key_id, *counter),
            Err(e) => LoggingHelper::log_verification_failure("assertion", key_id, e),
        }
        result
    }

    async fn assert_inner(
        &self,
        key_id: &str,
        assertion: &str,
        client_data: &str,
        session_id: Option<&str>,
    ) -> Result<u32, VerificationError> {
        if key_id.is_empty() {
            return Err(VerificationError::InvalidInput("keyId is empty".to_string()));
        }
        let assertion_bytes = decode_base64("assertion", assertion)?;
        let client_data_bytes = decode_base64("clientData", client_data)?;

        let _guard = self.locks.lock(key_id).await;

        let credential = self
            .store
            .get(key_id)
            .await?
            .filter(|credential| !credential.revoked)
            .ok_or_else(|| VerificationError::UnknownKey(key_id.to_string()))?;

        let verified = self
            .assertion
            .verify(&credential, &assertion_bytes, &client_data_bytes)?;

        let never_used = credential.last_used.is_none();
        if !self
            .counter_policy
            .accepts(credential.counter, never_used, verified.counter)
        {
            return Err(VerificationError::ReplayDetected {
                key_id: key_id.to_string(),
                stored: credential.counter,
                received: verified.counter,
            });
        }

        self.issuer
            .consume_in_session(&verified.client_data.challenge, session_id)?;

        self.store
            .compare_and_swap_counter(key_id, credential.counter, verified.counter, Utc::now())
            .await?;
        Ok(verified.counter)
    }

    /// Revoke a key; later assertions fail with `UnknownKey`
    ///
    /// # Errors
    ///
    /// Returns `UnknownKey` or `Storage`
    pub async fn revoke(&self, key_id: &str) -> Result<(), VerificationError> {
        let _guard = self.locks.lock(key_id).await;
        self.store.revoke(key_id).await?;
        LoggingHelper::log_credential_revoked(key_id);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `Storage` if the store is unavailable
    pub async fn credential(&self, key_id: &str) -> Result<Option<Credential>, VerificationError> {
        Ok(self.store.get(key_id).await?)
    }
}
