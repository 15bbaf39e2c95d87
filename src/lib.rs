#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the devicecheck server
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod attest;
pub mod challenge;
pub mod devicecheck;
pub mod handlers;
pub mod models;
pub mod settings;
pub mod store;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use attest::{AppAttestService, AssertionVerifier, AttestationVerifier, VerificationError};
pub use challenge::ChallengeIssuer;
pub use devicecheck::{AppleDeviceCheckGateway, DeviceCheckError, DeviceTokenGateway};
pub use handlers::{configure_services, AppState};
pub use models::Credential;
pub use settings::DeviceCheckSettings;
pub use store::{CredentialStore, MemoryCredentialStore};
