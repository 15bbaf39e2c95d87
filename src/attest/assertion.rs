//! App Attest assertion verification
//!
//! The cryptographic half of an assertion: structure, client data, app
//! binding and signature. Counter policy, challenge consumption and the
//! counter commit need the credential store and live in the service.

use super::authenticator::AuthenticatorData;
use super::cbor::decode_assertion;
use super::errors::{AssertionCheck, VerificationError};
use crate::models::Credential;
use crate::utils::crypto::{sha256, SHA256_LEN};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use serde::Deserialize;

/// Client data JSON the app signs alongside the authenticator data
///
/// Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientData {
    /// Base64 challenge previously issued by the server
    pub challenge: String,
    /// Action discriminator chosen by the app
    #[serde(rename = "type", alias = "action")]
    pub kind: String,
}

impl ClientData {
    /// # Errors
    ///
    /// Returns `AssertionInvalid` with the `client_data` check
    pub fn parse(bytes: &[u8]) -> Result<Self, VerificationError> {
        let data: Self = serde_json::from_slice(bytes).map_err(|e| {
            VerificationError::assertion(
                AssertionCheck::ClientData,
                format!("client data is not valid JSON: {e}"),
            )
        })?;
        if data.challenge.is_empty() {
            return Err(VerificationError::assertion(
                AssertionCheck::ClientData,
                "client data carries no challenge",
            ));
        }
        if data.kind.trim().is_empty() {
            return Err(VerificationError::assertion(
                AssertionCheck::ClientData,
                "client data carries no action type",
            ));
        }
        Ok(data)
    }
}

/// Result of the signature checks, before counter and challenge handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAssertion {
    pub counter: u32,
    pub client_data: ClientData,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AssertionVerifier;

impl AssertionVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Verify an assertion against a stored credential
    ///
    /// # Errors
    ///
    /// Returns `AssertionInvalid` naming the first failed check
    pub fn verify(
        &self,
        credential: &Credential,
        assertion: &[u8],
        client_data: &[u8],
    ) -> Result<VerifiedAssertion, VerificationError> {
        use AssertionCheck as Check;
        fn fail(check: AssertionCheck, detail: impl Into<String>) -> VerificationError {
            VerificationError::assertion(check, detail)
        }

        let object = decode_assertion(assertion).map_err(|e| fail(Check::Format, e))?;
        let auth_data = AuthenticatorData::parse(&object.authenticator_data)
            .map_err(|e| fail(Check::Format, e.to_string()))?;

        let parsed_client_data = ClientData::parse(client_data)?;

        let expected: [u8; SHA256_LEN] = sha256(&[credential.app_id.as_bytes()]);
        if auth_data.rp_id_hash != expected {
            return Err(fail(
                Check::AppId,
                format!("rpIdHash does not match {}", credential.app_id),
            ));
        }

        let key = VerifyingKey::from_sec1_bytes(&credential.public_key)
            .map_err(|_| fail(Check::Signature, "stored public key is not a P-256 point"))?;
        let signature = Signature::from_der(&object.signature)
            .map_err(|_| fail(Check::Signature, "signature is not DER-encoded ECDSA"))?;
        let signature = signature.normalize_s().unwrap_or(signature);

        let client_data_hash = sha256(&[client_data]);
        let nonce = sha256(&[
            object.authenticator_data.as_slice(),
            client_data_hash.as_slice(),
        ]);
        key.verify(&nonce, &signature)
            .map_err(|_| fail(Check::Signature, "signature does not verify"))?;

        Ok(VerifiedAssertion {
            counter: auth_data.counter,
            client_data: parsed_client_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppEnvironment, AppIdentity};
    use crate::testing::{client_data, test_app_id, DeviceKey, TEST_BUNDLE_ID, TEST_TEAM_ID};
    use chrono::Utc;

    fn credential_for(device: &DeviceKey) -> Credential {
        let app = AppIdentity::new(TEST_TEAM_ID, TEST_BUNDLE_ID, AppEnvironment::Development);
        Credential::attested(
            &device.key_id,
            device.public_key.clone(),
            Vec::new(),
            &app,
            Utc::now(),
        )
    }

    #[test]
    fn test_valid_assertion() {
        let device = DeviceKey::generate();
        let data = client_data("Y2hhbGxlbmdl", "login");
        let assertion = device.assert(&test_app_id(), &data, 5);

        let verified = AssertionVerifier::new()
            .verify(&credential_for(&device), &assertion, &data)
            .unwrap();
        assert_eq!(verified.counter, 5);
        assert_eq!(verified.client_data.challenge, "Y2hhbGxlbmdl");
        assert_eq!(verified.client_data.kind, "login");
    }

    #[test]
    fn test_action_alias_and_unknown_fields() {
        let parsed =
            ClientData::parse(br#"{"challenge":"abc","action":"purchase","extra":1}"#).unwrap();
        assert_eq!(parsed.kind, "purchase");
    }

    #[test]
    fn test_client_data_must_carry_action_type() {
        let err = ClientData::parse(br#"{"challenge":"abc"}"#).unwrap_err();
        assert_eq!(err.check_code(), Some("client_data"));
        let err = ClientData::parse(br#"{"challenge":"abc","type":"  "}"#).unwrap_err();
        assert_eq!(err.check_code(), Some("client_data"));
    }

    #[test]
    fn test_client_data_must_carry_challenge() {
        let err = ClientData::parse(br#"{"type":"login"}"#).unwrap_err();
        assert_eq!(err.check_code(), Some("client_data"));
        let err = ClientData::parse(br#"{"challenge":""}"#).unwrap_err();
        assert_eq!(err.check_code(), Some("client_data"));
        let err = ClientData::parse(b"not json").unwrap_err();
        assert_eq!(err.check_code(), Some("client_data"));
    }

    #[test]
    fn test_tampered_client_data_fails_signature() {
        let device = DeviceKey::generate();
        let signed = client_data("Y2hhbGxlbmdl", "login");
        let assertion = device.assert(&test_app_id(), &signed, 1);

        let other = client_data("b3RoZXI=", "login");
        let err = AssertionVerifier::new()
            .verify(&credential_for(&device), &assertion, &other)
            .unwrap_err();
        assert_eq!(err.check_code(), Some("signature"));
    }

    #[test]
    fn test_other_device_key_fails_signature() {
        let device = DeviceKey::generate();
        let impostor = DeviceKey::generate();
        let data = client_data("Y2hhbGxlbmdl", "login");
        let assertion = impostor.assert(&test_app_id(), &data, 1);

        let err = AssertionVerifier::new()
            .verify(&credential_for(&device), &assertion, &data)
            .unwrap_err();
        assert_eq!(err.check_code(), Some("signature"));
    }

    #[test]
    fn test_wrong_app_fails_app_id() {
        let device = DeviceKey::generate();
        let data = client_data("Y2hhbGxlbmdl", "login");
        let assertion = device.assert("OTHERTEAM1.com.example.other", &data, 1);

        let err = AssertionVerifier::new()
            .verify(&credential_for(&device), &assertion, &data)
            .unwrap_err();
        assert_eq!(err.check_code(), Some("app_id"));
    }

    #[test]
    fn test_malformed_assertion_fails_format() {
        let device = DeviceKey::generate();
        let data = client_data("Y2hhbGxlbmdl", "login");

        let err = AssertionVerifier::new()
            .verify(&credential_for(&device), b"garbage", &data)
            .unwrap_err();
        assert_eq!(err.check_code(), Some("format"));

        let truncated = device.assert_with_auth_data(&[0u8; 20], &data);
        let err = AssertionVerifier::new()
            .verify(&credential_for(&device), &truncated, &data)
            .unwrap_err();
        assert_eq!(err.check_code(), Some("format"));
    }
}
