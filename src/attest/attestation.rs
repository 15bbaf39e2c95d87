//! App Attest attestation verification
//!
//! Verification is a pure function of the attestation object, the key
//! identifier, the challenge bytes, the trust anchor and the expected app.
//! Challenge consumption and credential storage are left to the caller so a
//! failed check never mutates state.

use super::authenticator::AuthenticatorData;
use super::cbor::{decode_attestation, APPLE_APPATTEST_FORMAT};
use super::certificate::{check_validity, CertificateError, CredentialCertificate, TrustAnchor};
use super::errors::{AttestationCheck, VerificationError};
use crate::models::AppIdentity;
use crate::utils::crypto::{sha256, SHA256_LEN};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq as _;

/// Result of a successful attestation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAttestation {
    /// SEC1 uncompressed public key of the attested key
    pub public_key: Vec<u8>,
    pub receipt: Vec<u8>,
    pub counter: u32,
}

/// Decode a key identifier: standard base64 of the 32-byte public key hash
///
/// # Errors
///
/// Returns `InvalidInput` if the identifier is not base64 of 32 bytes
pub fn decode_key_id(key_id: &str) -> Result<Vec<u8>, VerificationError> {
    let bytes = STANDARD
        .decode(key_id)
        .map_err(|_| VerificationError::InvalidInput("keyId is not valid base64".to_string()))?;
    if bytes.len() != SHA256_LEN {
        return Err(VerificationError::InvalidInput(format!(
            "keyId must encode {SHA256_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

#[derive(Debug, Clone)]
pub struct AttestationVerifier {
    anchor: TrustAnchor,
    app: AppIdentity,
}

impl AttestationVerifier {
    #[must_use]
    pub fn new(anchor: TrustAnchor, app: AppIdentity) -> Self {
        Self { anchor, app }
    }

    #[must_use]
    pub fn app(&self) -> &AppIdentity {
        &self.app
    }

    /// Run every attestation check in order and return the certified key
    ///
    /// `challenge` is the raw challenge the client bound into the
    /// attestation; its SHA-256 is the client data hash.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a malformed key id and `AttestationInvalid`
    /// naming the first failed check otherwise
    pub fn verify(
        &self,
        key_id: &str,
        attestation: &[u8],
        challenge: &[u8],
        now: DateTime<Utc>,
    ) -> Result<VerifiedAttestation, VerificationError> {
        use AttestationCheck as Check;
        fn fail(check: AttestationCheck, detail: impl Into<String>) -> VerificationError {
            VerificationError::attestation(check, detail)
        }

        let key_id_bytes = decode_key_id(key_id)?;

        let object = decode_attestation(attestation).map_err(|e| fail(Check::Format, e))?;
        if object.fmt != APPLE_APPATTEST_FORMAT {
            return Err(fail(
                Check::Format,
                format!("unexpected attestation format {}", object.fmt),
            ));
        }
        let leaf_der = object
            .x5c
            .first()
            .ok_or_else(|| fail(Check::Format, "x5c is empty"))?;

        check_validity(leaf_der, now).map_err(|e| match e {
            CertificateError::OutsideValidity => fail(Check::CertificateValidity, e.to_string()),
            other => fail(Check::Format, other.to_string()),
        })?;

        self.anchor
            .verify_chain(&object.x5c, now)
            .map_err(|e| fail(Check::CertificateChain, e.to_string()))?;

        let leaf = CredentialCertificate::parse(leaf_der).map_err(|e| match e {
            CertificateError::MissingNonce | CertificateError::MalformedNonce => {
                fail(Check::Nonce, e.to_string())
            }
            other => fail(Check::Format, other.to_string()),
        })?;

        let client_data_hash = sha256(&[challenge]);
        let nonce = sha256(&[object.auth_data.as_slice(), client_data_hash.as_slice()]);
        if !bool::from(leaf.nonce.as_slice().ct_eq(nonce.as_slice())) {
            return Err(fail(
                Check::Nonce,
                "certificate nonce does not match authData and challenge",
            ));
        }

        let key_hash = sha256(&[leaf.public_key.as_slice()]);
        if !bool::from(key_hash.as_slice().ct_eq(key_id_bytes.as_slice())) {
            return Err(fail(
                Check::PublicKey,
                "keyId is not the hash of the certified public key",
            ));
        }

        let auth_data =
            AuthenticatorData::parse(&object.auth_data).map_err(|e| fail(Check::Format, e.to_string()))?;

        if auth_data.rp_id_hash != self.app.rp_id_hash() {
            return Err(fail(
                Check::AppId,
                format!("rpIdHash does not match {}", self.app.app_id()),
            ));
        }

        if auth_data.counter != 0 {
            return Err(fail(
                Check::Counter,
                format!("counter is {}, expected 0", auth_data.counter),
            ));
        }

        let attested = auth_data
            .require_attested()
            .map_err(|e| fail(Check::Format, e.to_string()))?;

        if attested.aaguid != self.app.environment.aaguid() {
            return Err(fail(
                Check::Aaguid,
                format!("AAGUID does not match the {} environment", self.app.environment),
            ));
        }

        if attested.credential_id != key_id_bytes {
            return Err(fail(
                Check::CredentialId,
                "credential id does not match keyId",
            ));
        }

        Ok(VerifiedAttestation {
            public_key: leaf.public_key,
            receipt: object.receipt,
            counter: auth_data.counter,
        })
    }
}
