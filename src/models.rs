use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::crypto::{sha256, SHA256_LEN};

/// AAGUID carried by App Attest keys generated in the development environment
pub const AAGUID_DEVELOPMENT: [u8; 16] = *b"appattestdevelop";

/// AAGUID carried by App Attest keys generated in the production environment
pub const AAGUID_PRODUCTION: [u8; 16] = *b"appattest\0\0\0\0\0\0\0";

/// Apple environment an app build targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppEnvironment {
    #[default]
    Development,
    Production,
}

impl AppEnvironment {
    /// AAGUID an attested key from this environment must carry
    #[must_use]
    pub fn aaguid(self) -> [u8; 16] {
        match self {
            Self::Development => AAGUID_DEVELOPMENT,
            Self::Production => AAGUID_PRODUCTION,
        }
    }

    /// Base URL of Apple's DeviceCheck API for this environment
    #[must_use]
    pub fn devicecheck_base_url(self) -> &'static str {
        match self {
            Self::Development => "https://api.development.devicecheck.apple.com/v1",
            Self::Production => "https://api.devicecheck.apple.com/v1",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for AppEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "sandbox" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("Unknown Apple environment: {other}")),
        }
    }
}

/// The app a credential is bound to: `teamID.bundleID` plus environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdentity {
    pub team_id: String,
    pub bundle_id: String,
    pub environment: AppEnvironment,
}

impl AppIdentity {
    #[must_use]
    pub fn new(team_id: &str, bundle_id: &str, environment: AppEnvironment) -> Self {
        Self {
            team_id: team_id.to_string(),
            bundle_id: bundle_id.to_string(),
            environment,
        }
    }

    /// App ID in Apple's `teamID.bundleID` form
    #[must_use]
    pub fn app_id(&self) -> String {
        format!("{}.{}", self.team_id, self.bundle_id)
    }

    /// Expected `rpIdHash` in authenticator data
    #[must_use]
    pub fn rp_id_hash(&self) -> [u8; SHA256_LEN] {
        sha256(&[self.app_id().as_bytes()])
    }
}

/// How the assertion counter must advance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CounterPolicy {
    /// Every assertion must report a counter strictly greater than the stored one
    #[default]
    Strict,
    /// Like `Strict`, but the first assertion after attestation may report 0
    AllowInitialZero,
}

impl CounterPolicy {
    /// Whether `received` may follow the stored counter state
    #[must_use]
    pub fn accepts(self, stored: u32, never_used: bool, received: u32) -> bool {
        match self {
            Self::Strict => received > stored,
            Self::AllowInitialZero => {
                received > stored || (never_used && stored == 0 && received == 0)
            }
        }
    }
}

impl FromStr for CounterPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "allow_initial_zero" => Ok(Self::AllowInitialZero),
            other => Err(format!("Unknown counter policy: {other}")),
        }
    }
}

/// A verified App Attest key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Client-generated key identifier (standard base64 of the public key hash)
    pub key_id: String,
    /// SEC1 uncompressed P-256 public key taken from the attestation certificate
    pub public_key: Vec<u8>,
    pub counter: u32,
    pub created_at: DateTime<Utc>,
    /// Time of the last accepted assertion
    pub last_used: Option<DateTime<Utc>>,
    pub app_id: String,
    pub environment: AppEnvironment,
    /// Attestation receipt, kept for later fraud-metric refreshes with Apple
    pub receipt: Vec<u8>,
    pub revoked: bool,
}

impl Credential {
    /// A freshly attested credential with counter 0
    #[must_use]
    pub fn attested(
        key_id: &str,
        public_key: Vec<u8>,
        receipt: Vec<u8>,
        app: &AppIdentity,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key_id: key_id.to_string(),
            public_key,
            counter: 0,
            created_at: now,
            last_used: None,
            app_id: app.app_id(),
            environment: app.environment,
            receipt,
            revoked: false,
        }
    }
}
