//! Attestation object builder
//!
//! Produces attestation objects that pass every check by default; each
//! builder method breaks exactly one of them.

use super::authority::{encode, DeviceKey, TestAuthority, Window};
use super::{TEST_BUNDLE_ID, TEST_TEAM_ID};
use crate::attest::APPLE_APPATTEST_FORMAT;
use crate::models::AppEnvironment;
use crate::utils::crypto::sha256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ciborium::{cbor, Value};

/// Default receipt bytes stored with an attestation
pub const TEST_RECEIPT: &[u8] = b"test-receipt";

pub struct AttestationFixture<'a> {
    authority: &'a TestAuthority,
    device: DeviceKey,
    app_id: String,
    environment: AppEnvironment,
    counter: u32,
    credential_id: Option<Vec<u8>>,
    format: String,
    receipt: Vec<u8>,
    window: Window,
}

/// An encoded attestation plus everything a test needs to assert on it
#[derive(Debug, Clone)]
pub struct BuiltAttestation {
    pub cbor: Vec<u8>,
    pub key_id: String,
    /// DER certificates, leaf first
    pub x5c: Vec<Vec<u8>>,
    pub public_key: Vec<u8>,
    pub receipt: Vec<u8>,
    pub expected_nonce: [u8; 32],
    pub device: DeviceKey,
}

impl BuiltAttestation {
    /// Attestation object as standard base64, the way clients submit it
    #[must_use]
    pub fn cbor_base64(&self) -> String {
        STANDARD.encode(&self.cbor)
    }
}

impl<'a> AttestationFixture<'a> {
    #[must_use]
    pub fn new(authority: &'a TestAuthority) -> Self {
        Self {
            authority,
            device: DeviceKey::generate(),
            app_id: format!("{TEST_TEAM_ID}.{TEST_BUNDLE_ID}"),
            environment: AppEnvironment::Development,
            counter: 0,
            credential_id: None,
            format: APPLE_APPATTEST_FORMAT.to_string(),
            receipt: TEST_RECEIPT.to_vec(),
            window: Window::around_now(1, 365),
        }
    }

    /// Attest an existing device key instead of a fresh one
    #[must_use]
    pub fn device(mut self, device: DeviceKey) -> Self {
        self.device = device;
        self
    }

    #[must_use]
    pub fn app_id(mut self, app_id: &str) -> Self {
        self.app_id = app_id.to_string();
        self
    }

    #[must_use]
    pub fn environment(mut self, environment: AppEnvironment) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn counter(mut self, counter: u32) -> Self {
        self.counter = counter;
        self
    }

    #[must_use]
    pub fn credential_id(mut self, credential_id: Vec<u8>) -> Self {
        self.credential_id = Some(credential_id);
        self
    }

    #[must_use]
    pub fn format(mut self, format: &str) -> Self {
        self.format = format.to_string();
        self
    }

    #[must_use]
    pub fn receipt(mut self, receipt: &[u8]) -> Self {
        self.receipt = receipt.to_vec();
        self
    }

    /// Leaf certificate that expired yesterday
    #[must_use]
    pub fn expired_leaf(mut self) -> Self {
        self.window = Window::around_now(30, -1);
        self
    }

    /// Encode the attestation object for `challenge`
    #[must_use]
    pub fn build(self, challenge: &[u8]) -> BuiltAttestation {
        let credential_id = self
            .credential_id
            .unwrap_or_else(|| self.device.key_id_bytes());

        let mut auth_data = sha256(&[self.app_id.as_bytes()]).to_vec();
        auth_data.push(0x41);
        auth_data.extend_from_slice(&self.counter.to_be_bytes());
        auth_data.extend_from_slice(&self.environment.aaguid());
        let id_len = u16::try_from(credential_id.len()).expect("credential id length");
        auth_data.extend_from_slice(&id_len.to_be_bytes());
        auth_data.extend_from_slice(&credential_id);
        // COSE key placeholder; the verifier takes the key from the certificate
        auth_data.extend_from_slice(&[0xa1, 0x01, 0x02]);

        let client_data_hash = sha256(&[challenge]);
        let expected_nonce = sha256(&[auth_data.as_slice(), client_data_hash.as_slice()]);

        let leaf = self
            .authority
            .issue_leaf(&self.device, &expected_nonce, self.window);
        let x5c = vec![leaf, self.authority.intermediate_der()];

        let cbor = encode(
            &cbor!({
                "fmt" => self.format.as_str(),
                "attStmt" => {
                    "x5c" => x5c.iter().cloned().map(Value::Bytes).collect::<Vec<_>>(),
                    "receipt" => Value::Bytes(self.receipt.clone())
                },
                "authData" => Value::Bytes(auth_data)
            })
            .expect("attestation cbor"),
        );

        BuiltAttestation {
            cbor,
            key_id: self.device.key_id.clone(),
            x5c,
            public_key: self.device.public_key.clone(),
            receipt: self.receipt,
            expected_nonce,
            device: self.device,
        }
    }
}

/// Client data JSON the way the iOS client builds it
#[must_use]
pub fn client_data(challenge: &str, kind: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "challenge": challenge,
        "type": kind,
    }))
    .expect("client data json")
}
