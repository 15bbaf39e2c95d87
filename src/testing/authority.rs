//! Throwaway certificate authority and device keys
//!
//! A fresh two-level CA is generated per [`TestAuthority`]: a self-signed
//! P-384 root and a P-256 intermediate, mirroring Apple's App Attestation
//! Root CA and "App Attestation CA 1".

use crate::attest::TrustAnchor;
use crate::utils::crypto::sha256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ciborium::{cbor, Value};
use openssl::asn1::{Asn1Integer, Asn1Object, Asn1OctetString, Asn1Time};
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey, PointConversionForm};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rand::rand_bytes;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Builder, X509Extension, X509Name, X509NameBuilder, X509};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use std::str::FromStr;

const NONCE_OID: &str = "1.2.840.113635.100.8.2";

fn ec_key(curve: Nid) -> PKey<Private> {
    let group = EcGroup::from_curve_name(curve).expect("curve");
    PKey::from_ec_key(EcKey::generate(&group).expect("ec key")).expect("pkey")
}

fn name(common_name: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().expect("name builder");
    builder
        .append_entry_by_text("CN", common_name)
        .expect("CN");
    builder.append_entry_by_text("O", "Test").expect("O");
    builder.build()
}

fn serial() -> Asn1Integer {
    let mut bytes = [0u8; 8];
    rand_bytes(&mut bytes).expect("random serial");
    bytes[0] &= 0x7f;
    Asn1Integer::from_bn(&BigNum::from_slice(&bytes).expect("bignum")).expect("serial")
}

/// Validity window as unix timestamps
#[derive(Debug, Clone, Copy)]
pub(crate) struct Window {
    pub not_before: i64,
    pub not_after: i64,
}

impl Window {
    pub(crate) fn around_now(days_before: i64, days_after: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            not_before: now - days_before * 86_400,
            not_after: now + days_after * 86_400,
        }
    }
}

/// Root and intermediate CA generated at runtime
pub struct TestAuthority {
    root: X509,
    intermediate: X509,
    intermediate_key: PKey<Private>,
}

impl Default for TestAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAuthority {
    #[must_use]
    pub fn new() -> Self {
        let root_key = ec_key(Nid::SECP384R1);
        let root_name = name("Test App Attestation Root CA");
        let mut builder = X509Builder::new().expect("builder");
        builder.set_version(2).expect("version");
        builder.set_serial_number(&serial()).expect("serial");
        builder.set_subject_name(&root_name).expect("subject");
        builder.set_issuer_name(&root_name).expect("issuer");
        builder.set_pubkey(&root_key).expect("pubkey");
        let window = Window::around_now(2, 3650);
        set_window(&mut builder, window);
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().expect("bc"))
            .expect("bc ext");
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()
                    .expect("ku"),
            )
            .expect("ku ext");
        builder
            .sign(&root_key, MessageDigest::sha384())
            .expect("sign root");
        let root = builder.build();

        let intermediate_key = ec_key(Nid::X9_62_PRIME256V1);
        let mut builder = X509Builder::new().expect("builder");
        builder.set_version(2).expect("version");
        builder.set_serial_number(&serial()).expect("serial");
        builder
            .set_subject_name(&name("Test App Attestation CA 1"))
            .expect("subject");
        builder
            .set_issuer_name(root.subject_name())
            .expect("issuer");
        builder.set_pubkey(&intermediate_key).expect("pubkey");
        set_window(&mut builder, window);
        builder
            .append_extension(
                BasicConstraints::new()
                    .critical()
                    .ca()
                    .pathlen(0)
                    .build()
                    .expect("bc"),
            )
            .expect("bc ext");
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()
                    .expect("ku"),
            )
            .expect("ku ext");
        builder
            .sign(&root_key, MessageDigest::sha384())
            .expect("sign intermediate");
        let intermediate = builder.build();

        Self {
            root,
            intermediate,
            intermediate_key,
        }
    }

    /// Anchor that accepts chains issued by this authority
    #[must_use]
    pub fn trust_anchor(&self) -> TrustAnchor {
        TrustAnchor::from_pem(&self.root_pem()).expect("root anchor")
    }

    #[must_use]
    pub fn root_pem(&self) -> Vec<u8> {
        self.root.to_pem().expect("root pem")
    }

    #[must_use]
    pub fn intermediate_der(&self) -> Vec<u8> {
        self.intermediate.to_der().expect("intermediate der")
    }

    /// Issue a credential certificate for `device` carrying the nonce extension
    pub(crate) fn issue_leaf(&self, device: &DeviceKey, nonce: &[u8], window: Window) -> Vec<u8> {
        let mut builder = X509Builder::new().expect("builder");
        builder.set_version(2).expect("version");
        builder.set_serial_number(&serial()).expect("serial");
        builder
            .set_subject_name(&name(&device.key_id))
            .expect("subject");
        builder
            .set_issuer_name(self.intermediate.subject_name())
            .expect("issuer");
        builder.set_pubkey(&device.pkey).expect("pubkey");
        set_window(&mut builder, window);
        builder
            .append_extension(BasicConstraints::new().critical().build().expect("bc"))
            .expect("bc ext");

        // SEQUENCE { [1] EXPLICIT { OCTET STRING nonce } }
        let mut value = vec![0x30, 0x24, 0xa1, 0x22, 0x04, 0x20];
        value.extend_from_slice(nonce);
        let oid = Asn1Object::from_str(NONCE_OID).expect("nonce oid");
        let octets = Asn1OctetString::new_from_bytes(&value).expect("octets");
        builder
            .append_extension(X509Extension::new_from_der(&oid, false, &octets).expect("nonce ext"))
            .expect("append nonce");

        builder
            .sign(&self.intermediate_key, MessageDigest::sha256())
            .expect("sign leaf");
        builder.build().to_der().expect("leaf der")
    }
}

fn set_window(builder: &mut X509Builder, window: Window) {
    builder
        .set_not_before(&Asn1Time::from_unix(window.not_before).expect("not before"))
        .expect("set not before");
    builder
        .set_not_after(&Asn1Time::from_unix(window.not_after).expect("not after"))
        .expect("set not after");
}

/// A device's App Attest key pair
#[derive(Clone)]
pub struct DeviceKey {
    pkey: PKey<Private>,
    signing_key: SigningKey,
    /// SEC1 uncompressed public key
    pub public_key: Vec<u8>,
    /// Standard base64 of `SHA256(public_key)`
    pub key_id: String,
}

impl std::fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKey")
            .field("key_id", &self.key_id)
            .finish()
    }
}

impl Default for DeviceKey {
    fn default() -> Self {
        Self::generate()
    }
}

impl DeviceKey {
    #[must_use]
    pub fn generate() -> Self {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("curve");
        let ec = EcKey::generate(&group).expect("ec key");
        let mut ctx = BigNumContext::new().expect("bn ctx");
        let public_key = ec
            .public_key()
            .to_bytes(&group, PointConversionForm::UNCOMPRESSED, &mut ctx)
            .expect("public key bytes");
        let pkey = PKey::from_ec_key(ec).expect("pkey");
        let pkcs8 = pkey.private_key_to_pkcs8().expect("pkcs8");
        let signing_key = SigningKey::from_pkcs8_der(&pkcs8).expect("p256 key");
        let key_id = STANDARD.encode(sha256(&[public_key.as_slice()]));

        Self {
            pkey,
            signing_key,
            public_key,
            key_id,
        }
    }

    /// Raw key identifier bytes
    #[must_use]
    pub fn key_id_bytes(&self) -> Vec<u8> {
        sha256(&[self.public_key.as_slice()]).to_vec()
    }

    /// Build an assertion object for `client_data` with the given counter
    #[must_use]
    pub fn assert(&self, app_id: &str, client_data: &[u8], counter: u32) -> Vec<u8> {
        let mut auth_data = sha256(&[app_id.as_bytes()]).to_vec();
        auth_data.push(0x01);
        auth_data.extend_from_slice(&counter.to_be_bytes());
        self.assert_with_auth_data(&auth_data, client_data)
    }

    /// Sign arbitrary authenticator data; used to build malformed assertions
    #[must_use]
    pub fn assert_with_auth_data(&self, auth_data: &[u8], client_data: &[u8]) -> Vec<u8> {
        let client_data_hash = sha256(&[client_data]);
        let nonce = sha256(&[auth_data, client_data_hash.as_slice()]);
        let signature: Signature = self.signing_key.sign(&nonce);
        encode(&cbor!({
            "signature" => Value::Bytes(signature.to_der().as_bytes().to_vec()),
            "authenticatorData" => Value::Bytes(auth_data.to_vec())
        })
        .expect("assertion cbor"))
    }
}

pub(crate) fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).expect("cbor encode");
    buf
}
