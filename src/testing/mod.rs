//! Testing utilities
//!
//! Only compiled for unit tests or with the `testing` feature. Builds fully
//! valid App Attest attestations and assertions signed by an in-process CA so
//! the whole verification path runs without a physical device.
//!
//! ```rust,ignore
//! use devicecheck_server::testing::{AttestationFixture, TestAuthority};
//!
//! let authority = TestAuthority::new();
//! let built = AttestationFixture::new(&authority).build(b"challenge");
//! ```

pub mod authority;
pub mod fixtures;
pub mod mock;

pub use authority::{DeviceKey, TestAuthority};
pub use fixtures::{client_data, AttestationFixture, BuiltAttestation, TEST_RECEIPT};
pub use mock::{
    test_app_state, test_service, unconfigured_gateway, write_auth_key, MockAppleServer,
    RecordedRequest,
};

/// Team identifier used by fixtures
pub const TEST_TEAM_ID: &str = "TEAMID1234";

/// Bundle identifier used by fixtures
pub const TEST_BUNDLE_ID: &str = "com.example.devicecheck";

/// `teamID.bundleID` of the fixture app
#[must_use]
pub fn test_app_id() -> String {
    format!("{TEST_TEAM_ID}.{TEST_BUNDLE_ID}")
}
