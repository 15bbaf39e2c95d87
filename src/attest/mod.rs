//! Apple App Attest verification
//!
//! [`AttestationVerifier`] validates the one-time attestation that binds a
//! device key to this app; [`AssertionVerifier`] validates later signed
//! requests made with that key. [`AppAttestService`] adds challenges,
//! storage and counter tracking around both.

pub mod assertion;
pub mod attestation;
pub mod authenticator;
pub mod cbor;
pub mod certificate;
pub mod errors;
pub mod service;

pub use assertion::{AssertionVerifier, ClientData, VerifiedAssertion};
pub use attestation::{decode_key_id, AttestationVerifier, VerifiedAttestation};
pub use cbor::APPLE_APPATTEST_FORMAT;
pub use certificate::{CertificateError, TrustAnchor};
pub use errors::{AssertionCheck, AttestationCheck, VerificationError};
pub use service::AppAttestService;
