//! App Attest verification errors
//!
//! Every failure carries a stable machine-readable code. Attestation and
//! assertion failures additionally name the individual check that failed.

use crate::challenge::ChallengeError;
use crate::store::StoreError;
use std::fmt;
use thiserror::Error;

/// The individual attestation checks, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationCheck {
    /// CBOR structure, `fmt`, `x5c`, `authData`
    Format,
    /// Leaf certificate validity window
    CertificateValidity,
    /// Chain to the Apple App Attestation root
    CertificateChain,
    /// Nonce extension equals `SHA256(authData || clientDataHash)`
    Nonce,
    /// Key identifier equals the hash of the certified public key
    PublicKey,
    /// `rpIdHash` equals `SHA256(teamID.bundleID)`
    AppId,
    /// Counter is zero
    Counter,
    /// AAGUID matches the configured environment
    Aaguid,
    /// Embedded credential id equals the key identifier
    CredentialId,
}

impl AttestationCheck {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Format => "format",
            Self::CertificateValidity => "certificate_validity",
            Self::CertificateChain => "certificate_chain",
            Self::Nonce => "nonce",
            Self::PublicKey => "public_key",
            Self::AppId => "app_id",
            Self::Counter => "counter",
            Self::Aaguid => "aaguid",
            Self::CredentialId => "credential_id",
        }
    }
}

impl fmt::Display for AttestationCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The individual assertion checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionCheck {
    /// CBOR structure, `signature`, `authenticatorData`
    Format,
    /// Client data is JSON carrying a challenge and an action type
    ClientData,
    /// `rpIdHash` equals the credential's app id
    AppId,
    /// ECDSA signature over the nonce
    Signature,
}

impl AssertionCheck {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Format => "format",
            Self::ClientData => "client_data",
            Self::AppId => "app_id",
            Self::Signature => "signature",
        }
    }
}

impl fmt::Display for AssertionCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Challenge rejected: {0}")]
    ChallengeExpiredOrUsed(#[source] ChallengeError),

    #[error("Attestation failed {check} check: {detail}")]
    AttestationInvalid {
        check: AttestationCheck,
        detail: String,
    },

    #[error("Assertion failed {check} check: {detail}")]
    AssertionInvalid {
        check: AssertionCheck,
        detail: String,
    },

    #[error("Key {0} is already registered")]
    DuplicateKey(String),

    #[error("Key {0} is not registered")]
    UnknownKey(String),

    #[error("Replay detected for key {key_id}: counter {received} does not advance stored counter {stored}")]
    ReplayDetected {
        key_id: String,
        stored: u32,
        received: u32,
    },

    #[error("Credential storage failure: {0}")]
    Storage(String),
}

impl VerificationError {
    pub(crate) fn attestation(check: AttestationCheck, detail: impl Into<String>) -> Self {
        Self::AttestationInvalid {
            check,
            detail: detail.into(),
        }
    }

    pub(crate) fn assertion(check: AssertionCheck, detail: impl Into<String>) -> Self {
        Self::AssertionInvalid {
            check,
            detail: detail.into(),
        }
    }

    /// Stable error code for API responses
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::ChallengeExpiredOrUsed(_) => "challenge_expired_or_used",
            Self::AttestationInvalid { .. } => "attestation_invalid",
            Self::AssertionInvalid { .. } => "assertion_invalid",
            Self::DuplicateKey(_) => "duplicate_key",
            Self::UnknownKey(_) => "unknown_key",
            Self::ReplayDetected { .. } => "replay_detected",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Sub-code naming the failed check, for attestation and assertion failures
    #[must_use]
    pub fn check_code(&self) -> Option<&'static str> {
        match self {
            Self::AttestationInvalid { check, .. } => Some(check.code()),
            Self::AssertionInvalid { check, .. } => Some(check.code()),
            _ => None,
        }
    }

    /// Message safe to show clients regardless of detail exposure
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "The request is malformed or invalid",
            Self::ChallengeExpiredOrUsed(_) => "The challenge is unknown, expired or already used",
            Self::AttestationInvalid { .. } => "Attestation verification failed",
            Self::AssertionInvalid { .. } => "Assertion verification failed",
            Self::DuplicateKey(_) => "The key is already registered",
            Self::UnknownKey(_) => "The key is not registered",
            Self::ReplayDetected { .. } => "Replay detected: the assertion counter did not advance",
            Self::Storage(_) => "An internal server error occurred",
        }
    }
}

impl From<ChallengeError> for VerificationError {
    fn from(err: ChallengeError) -> Self {
        match err {
            ChallengeError::RandomUnavailable => Self::Storage(err.to_string()),
            _ => Self::ChallengeExpiredOrUsed(err),
        }
    }
}

impl From<StoreError> for VerificationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey(key_id) => Self::DuplicateKey(key_id),
            StoreError::UnknownKey(key_id) => Self::UnknownKey(key_id),
            StoreError::CounterConflict {
                key_id,
                expected: _,
                actual,
            } => Self::Storage(format!(
                "counter for {key_id} changed concurrently (now {actual})"
            )),
            StoreError::Unavailable(msg) => Self::Storage(msg),
        }
    }
}
