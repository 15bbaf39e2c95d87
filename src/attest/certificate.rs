//! Attestation certificate handling
//!
//! The chain in `x5c` must build to a fixed trust anchor, the Apple App
//! Attestation Root CA bundled with the binary. Chain building is delegated
//! to OpenSSL; field extraction (validity, nonce extension, public key)
//! uses `x509-parser`.

use chrono::{DateTime, Utc};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::verify::X509VerifyParam;
use openssl::x509::{X509StoreContext, X509};
use std::path::Path;
use thiserror::Error;
use x509_parser::der_parser::ber::BerObjectContent;
use x509_parser::der_parser::der::parse_der;
use x509_parser::der_parser::oid::Oid;
use x509_parser::prelude::{parse_x509_certificate, ASN1Time, X509Certificate};

/// Apple App Attestation Root CA
pub const APPLE_APP_ATTESTATION_ROOT_CA_PEM: &str =
    include_str!("../../certs/Apple_App_Attestation_Root_CA.pem");

/// OID of the App Attest nonce extension
pub const NONCE_EXTENSION_OID: &[u64] = &[1, 2, 840, 113_635, 100, 8, 2];

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate chain is empty")]
    EmptyChain,
    #[error("certificate is not valid DER: {0}")]
    Malformed(String),
    #[error("certificate is outside its validity period")]
    OutsideValidity,
    #[error("certificate chain does not build to the trust anchor: {0}")]
    Untrusted(String),
    #[error("certificate has no App Attest nonce extension")]
    MissingNonce,
    #[error("App Attest nonce extension is malformed")]
    MalformedNonce,
    #[error("trust anchor could not be loaded: {0}")]
    Anchor(String),
}

/// Root certificate an attestation chain must terminate at
#[derive(Clone)]
pub struct TrustAnchor {
    root: X509,
}

impl std::fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustAnchor")
            .field("subject", &self.root.subject_name())
            .finish()
    }
}

impl TrustAnchor {
    /// The bundled Apple App Attestation Root CA
    ///
    /// # Errors
    ///
    /// Returns `Anchor` if the bundled PEM cannot be parsed
    pub fn apple() -> Result<Self, CertificateError> {
        Self::from_pem(APPLE_APP_ATTESTATION_ROOT_CA_PEM.as_bytes())
    }

    /// # Errors
    ///
    /// Returns `Anchor` if the PEM cannot be parsed
    pub fn from_pem(pem: &[u8]) -> Result<Self, CertificateError> {
        X509::from_pem(pem)
            .map(|root| Self { root })
            .map_err(|e| CertificateError::Anchor(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns `Anchor` if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self, CertificateError> {
        let pem = std::fs::read(path)
            .map_err(|e| CertificateError::Anchor(format!("{}: {e}", path.display())))?;
        Self::from_pem(&pem)
    }

    /// Verify that `chain` (leaf first, DER) builds to this anchor at time `at`
    ///
    /// # Errors
    ///
    /// Returns `EmptyChain`, `Malformed` or `Untrusted`
    pub fn verify_chain(&self, chain: &[Vec<u8>], at: DateTime<Utc>) -> Result<(), CertificateError> {
        let (leaf_der, intermediates_der) = chain.split_first().ok_or(CertificateError::EmptyChain)?;

        let openssl_err = |e: openssl::error::ErrorStack| CertificateError::Untrusted(e.to_string());
        let leaf = X509::from_der(leaf_der).map_err(|e| CertificateError::Malformed(e.to_string()))?;

        let mut intermediates = Stack::new().map_err(openssl_err)?;
        for der in intermediates_der {
            let cert = X509::from_der(der).map_err(|e| CertificateError::Malformed(e.to_string()))?;
            intermediates.push(cert).map_err(openssl_err)?;
        }

        let mut params = X509VerifyParam::new().map_err(openssl_err)?;
        params.set_time(at.timestamp());

        let mut builder = X509StoreBuilder::new().map_err(openssl_err)?;
        builder.add_cert(self.root.clone()).map_err(openssl_err)?;
        builder.set_param(&params).map_err(openssl_err)?;
        let store = builder.build();

        let mut context = X509StoreContext::new().map_err(openssl_err)?;
        let (verified, result) = context
            .init(&store, &leaf, &intermediates, |ctx| {
                let verified = ctx.verify_cert()?;
                Ok((verified, ctx.error()))
            })
            .map_err(openssl_err)?;

        if verified {
            Ok(())
        } else {
            Err(CertificateError::Untrusted(result.error_string().to_string()))
        }
    }
}

/// Fields of the credential (leaf) certificate the verifier needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialCertificate {
    /// SEC1 uncompressed public key
    pub public_key: Vec<u8>,
    /// Contents of the nonce extension
    pub nonce: Vec<u8>,
}

impl CredentialCertificate {
    /// Parse the leaf certificate
    ///
    /// # Errors
    ///
    /// Returns `Malformed`, `MissingNonce` or `MalformedNonce`
    pub fn parse(der: &[u8]) -> Result<Self, CertificateError> {
        let (_, cert) =
            parse_x509_certificate(der).map_err(|e| CertificateError::Malformed(e.to_string()))?;

        Ok(Self {
            public_key: cert.public_key().subject_public_key.data.to_vec(),
            nonce: extract_nonce(&cert)?,
        })
    }
}

/// Check the leaf validity window using the certificate's own encoding
///
/// # Errors
///
/// Returns `Malformed` or `OutsideValidity`
pub fn check_validity(der: &[u8], at: DateTime<Utc>) -> Result<(), CertificateError> {
    let (_, cert) =
        parse_x509_certificate(der).map_err(|e| CertificateError::Malformed(e.to_string()))?;
    let when = ASN1Time::from_timestamp(at.timestamp())
        .map_err(|e| CertificateError::Malformed(e.to_string()))?;
    if cert.validity().is_valid_at(when) {
        Ok(())
    } else {
        Err(CertificateError::OutsideValidity)
    }
}

/// The extension is `SEQUENCE { [1] EXPLICIT OCTET STRING nonce }`
fn extract_nonce(cert: &X509Certificate<'_>) -> Result<Vec<u8>, CertificateError> {
    let oid = Oid::from(NONCE_EXTENSION_OID).map_err(|_| CertificateError::MalformedNonce)?;
    let extension = cert
        .extensions()
        .iter()
        .find(|ext| ext.oid == oid)
        .ok_or(CertificateError::MissingNonce)?;

    let (_, outer) = parse_der(extension.value).map_err(|_| CertificateError::MalformedNonce)?;
    let items = outer
        .as_sequence()
        .map_err(|_| CertificateError::MalformedNonce)?;

    for item in items {
        match &item.content {
            BerObjectContent::Tagged(_, _, inner) => {
                return inner
                    .as_slice()
                    .map(<[u8]>::to_vec)
                    .map_err(|_| CertificateError::MalformedNonce);
            }
            BerObjectContent::Unknown(any) => {
                let (_, inner) = parse_der(any.data).map_err(|_| CertificateError::MalformedNonce)?;
                return inner
                    .as_slice()
                    .map(<[u8]>::to_vec)
                    .map_err(|_| CertificateError::MalformedNonce);
            }
            _ => {}
        }
    }
    Err(CertificateError::MalformedNonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AttestationFixture, TestAuthority};
    use chrono::Duration;

    #[test]
    fn test_bundled_apple_root_loads() {
        let anchor = TrustAnchor::apple().unwrap();
        let debug = format!("{anchor:?}");
        assert!(debug.contains("TrustAnchor"));
    }

    #[test]
    fn test_chain_verifies_against_issuing_root() {
        let authority = TestAuthority::new();
        let fixture = AttestationFixture::new(&authority);
        let built = fixture.build("challenge".as_bytes());

        let anchor = authority.trust_anchor();
        anchor.verify_chain(&built.x5c, Utc::now()).unwrap();
    }

    #[test]
    fn test_chain_rejected_by_other_root() {
        let authority = TestAuthority::new();
        let built = AttestationFixture::new(&authority).build(b"challenge");

        let apple = TrustAnchor::apple().unwrap();
        let err = apple.verify_chain(&built.x5c, Utc::now()).unwrap_err();
        assert!(matches!(err, CertificateError::Untrusted(_)));

        let other = TestAuthority::new().trust_anchor();
        assert!(other.verify_chain(&built.x5c, Utc::now()).is_err());
    }

    #[test]
    fn test_chain_without_intermediate_is_untrusted() {
        let authority = TestAuthority::new();
        let built = AttestationFixture::new(&authority).build(b"challenge");
        let leaf_only = vec![built.x5c[0].clone()];
        assert!(authority
            .trust_anchor()
            .verify_chain(&leaf_only, Utc::now())
            .is_err());
        assert!(matches!(
            authority.trust_anchor().verify_chain(&[], Utc::now()),
            Err(CertificateError::EmptyChain)
        ));
    }

    #[test]
    fn test_leaf_fields_are_extracted() {
        let authority = TestAuthority::new();
        let built = AttestationFixture::new(&authority).build(b"challenge");
        let leaf = CredentialCertificate::parse(&built.x5c[0]).unwrap();

        assert_eq!(leaf.public_key.len(), 65);
        assert_eq!(leaf.public_key[0], 0x04);
        assert_eq!(leaf.nonce, built.expected_nonce.to_vec());
    }

    #[test]
    fn test_validity_window() {
        let authority = TestAuthority::new();
        let built = AttestationFixture::new(&authority).build(b"challenge");
        check_validity(&built.x5c[0], Utc::now()).unwrap();
        assert!(matches!(
            check_validity(&built.x5c[0], Utc::now() - Duration::days(30)),
            Err(CertificateError::OutsideValidity)
        ));
    }

    #[test]
    fn test_certificate_without_nonce_extension() {
        let authority = TestAuthority::new();
        let der = authority.intermediate_der();
        assert!(matches!(
            CredentialCertificate::parse(&der),
            Err(CertificateError::MissingNonce)
        ));
    }
}
