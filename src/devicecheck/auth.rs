//! DeviceCheck auth tokens
//!
//! Apple authenticates server-to-server calls with an ES256 JWT signed by a
//! DeviceCheck key (`AuthKey_<KEYID>.p8`). Tokens live at most one hour; the
//! provider caches one and replaces it shortly before it expires.

use super::errors::DeviceCheckError;
use crate::settings::{DeviceCheckSettings, MAX_TOKEN_LIFETIME_SECONDS};
use crate::utils::crypto::{create_es256_header, create_es256_jwt};
use crate::utils::logging::LoggingHelper;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// `aud` claim Apple expects
pub const DEVICECHECK_AUDIENCE: &str = "devicecheck.apple.com";

/// A cached token is replaced once it is this close to expiry
pub const REFRESH_MARGIN_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
pub struct AuthKeyConfig {
    pub team_id: String,
    pub key_id: String,
    pub private_key_path: PathBuf,
    pub lifetime_seconds: i64,
}

impl AuthKeyConfig {
    #[must_use]
    pub fn from_settings(settings: &DeviceCheckSettings) -> Self {
        Self {
            team_id: settings.apple.team_id.clone(),
            key_id: settings.device_check.key_id.clone(),
            private_key_path: PathBuf::from(&settings.device_check.private_key_path),
            lifetime_seconds: settings.token_lifetime_seconds(),
        }
    }

    /// Reject unset and placeholder identifiers
    ///
    /// # Errors
    ///
    /// Returns `AuthMisconfigured` naming the offending value
    pub fn validate(&self) -> Result<(), DeviceCheckError> {
        if is_placeholder(&self.team_id) {
            return Err(DeviceCheckError::AuthMisconfigured(
                "Apple team id is not configured".to_string(),
            ));
        }
        if is_placeholder(&self.key_id) {
            return Err(DeviceCheckError::AuthMisconfigured(
                "DeviceCheck key id is not configured".to_string(),
            ));
        }
        if self.private_key_path.as_os_str().is_empty() {
            return Err(DeviceCheckError::AuthMisconfigured(
                "DeviceCheck private key path is not configured".to_string(),
            ));
        }
        Ok(())
    }

    fn read_private_key(&self) -> Result<String, DeviceCheckError> {
        std::fs::read_to_string(&self.private_key_path).map_err(|e| {
            DeviceCheckError::AuthMisconfigured(format!(
                "cannot read DeviceCheck private key {}: {e}",
                self.private_key_path.display()
            ))
        })
    }
}

fn is_placeholder(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.starts_with("YOUR_")
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

/// Issues and caches DeviceCheck auth tokens
#[derive(Debug)]
pub struct AuthTokenProvider {
    config: AuthKeyConfig,
    cached: Mutex<Option<CachedToken>>,
}

impl AuthTokenProvider {
    #[must_use]
    pub fn new(config: AuthKeyConfig) -> Self {
        Self {
            config,
            cached: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthKeyConfig {
        &self.config
    }

    /// Build and sign a new token, bypassing the cache
    ///
    /// # Errors
    ///
    /// Returns `AuthMisconfigured` if the identifiers are placeholders or the
    /// private key cannot be read or parsed
    pub fn generate_auth_token(&self) -> Result<String, DeviceCheckError> {
        self.generate_at(Utc::now()).map(|cached| cached.token)
    }

    /// Cached token, regenerated when missing or close to expiry
    ///
    /// # Errors
    ///
    /// Same as [`Self::generate_auth_token`]
    pub fn token(&self) -> Result<String, DeviceCheckError> {
        self.token_at(Utc::now())
    }

    /// # Errors
    ///
    /// Same as [`Self::generate_auth_token`]
    pub fn token_at(&self, now: DateTime<Utc>) -> Result<String, DeviceCheckError> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = cached.as_ref() {
            if current.expires_at - now.timestamp() > REFRESH_MARGIN_SECONDS {
                return Ok(current.token.clone());
            }
        }
        let fresh = self.generate_at(now)?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    /// Drop the cached token, e.g. after Apple rejected it
    pub fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn generate_at(&self, now: DateTime<Utc>) -> Result<CachedToken, DeviceCheckError> {
        self.config.validate()?;
        let private_key_pem = self.config.read_private_key()?;

        let issued_at = now.timestamp();
        let expires_at =
            issued_at + self.config.lifetime_seconds.clamp(1, MAX_TOKEN_LIFETIME_SECONDS);

        let header = create_es256_header(&self.config.key_id);
        let payload = serde_json::json!({
            "iss": self.config.team_id,
            "iat": issued_at,
            "exp": expires_at,
            "aud": DEVICECHECK_AUDIENCE,
        });

        let token = create_es256_jwt(&header, &payload, &private_key_pem)
            .map_err(|e| DeviceCheckError::AuthMisconfigured(e.to_string()))?;
        LoggingHelper::log_auth_token_refreshed(expires_at);

        Ok(CachedToken { token, expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crypto::tests::decode_jwt_segment;
    use crate::utils::crypto::tests::TEST_ES256_PRIVATE_KEY;
    use chrono::Duration;
    use std::io::Write;

    fn key_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TEST_ES256_PRIVATE_KEY.as_bytes()).unwrap();
        file
    }

    fn config(path: &std::path::Path) -> AuthKeyConfig {
        AuthKeyConfig {
            team_id: "TEAMID1234".to_string(),
            key_id: "KEYID56789".to_string(),
            private_key_path: path.to_path_buf(),
            lifetime_seconds: 3600,
        }
    }

    #[test]
    fn test_token_claims() {
        let file = key_file();
        let provider = AuthTokenProvider::new(config(file.path()));
        let token = provider.generate_auth_token().unwrap();

        let header = decode_jwt_segment(&token, 0).unwrap();
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["kid"], "KEYID56789");

        let claims = decode_jwt_segment(&token, 1).unwrap();
        assert_eq!(claims["iss"], "TEAMID1234");
        assert_eq!(claims["aud"], "devicecheck.apple.com");
        let iat = claims["iat"].as_i64().unwrap();
        let exp = claims["exp"].as_i64().unwrap();
        assert_eq!(exp - iat, 3600);
    }

    #[test]
    fn test_lifetime_never_exceeds_an_hour() {
        let file = key_file();
        let mut config = config(file.path());
        config.lifetime_seconds = 86_400;
        let provider = AuthTokenProvider::new(config);
        let claims = decode_jwt_segment(&provider.generate_auth_token().unwrap(), 1).unwrap();
        let lifetime = claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap();
        assert_eq!(lifetime, 3600);
    }

    #[test]
    fn test_cache_reuses_until_near_expiry() {
        let file = key_file();
        let provider = AuthTokenProvider::new(config(file.path()));
        let start = Utc::now();

        let first = provider.token_at(start).unwrap();
        let later = provider.token_at(start + Duration::seconds(1800)).unwrap();
        assert_eq!(first, later);

        let refreshed = provider
            .token_at(start + Duration::seconds(3600 - 30))
            .unwrap();
        assert_ne!(first, refreshed);

        let cached = provider
            .token_at(start + Duration::seconds(3600 + 60))
            .unwrap();
        assert_eq!(refreshed, cached);

        provider.invalidate();
        let after_invalidate = provider
            .token_at(start + Duration::seconds(3600 + 60))
            .unwrap();
        assert_ne!(refreshed, after_invalidate);
    }

    #[test]
    fn test_placeholders_are_rejected() {
        let file = key_file();
        let mut bad = config(file.path());
        bad.team_id = "YOUR_TEAM_ID".to_string();
        assert!(matches!(
            AuthTokenProvider::new(bad).generate_auth_token(),
            Err(DeviceCheckError::AuthMisconfigured(_))
        ));

        let mut bad = config(file.path());
        bad.key_id = String::new();
        assert!(matches!(
            AuthTokenProvider::new(bad).generate_auth_token(),
            Err(DeviceCheckError::AuthMisconfigured(_))
        ));
    }

    #[test]
    fn test_unreadable_or_invalid_key() {
        let missing = config(std::path::Path::new("/nonexistent/AuthKey.p8"));
        assert!(matches!(
            AuthTokenProvider::new(missing).generate_auth_token(),
            Err(DeviceCheckError::AuthMisconfigured(_))
        ));

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        garbage.write_all(b"not a key").unwrap();
        assert!(matches!(
            AuthTokenProvider::new(config(garbage.path())).generate_auth_token(),
            Err(DeviceCheckError::AuthMisconfigured(_))
        ));
    }
}
