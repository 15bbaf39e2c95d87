// Centralized log formats for verification and DeviceCheck traffic
use log::{debug, info, warn};

use crate::attest::VerificationError;
use crate::devicecheck::DeviceCheckError;

/// Log target for signals that point at cloned keys or replayed requests
pub const SECURITY_TARGET: &str = "security";

/// Characters of a device token that may appear in logs
pub const TOKEN_LOG_PREFIX: usize = 20;

pub struct LoggingHelper;

impl LoggingHelper {
    /// Truncate a device token for logging
    #[must_use]
    pub fn redact_token(token: &str) -> String {
        match token.char_indices().nth(TOKEN_LOG_PREFIX) {
            Some((end, _)) => format!("{}...", &token[..end]),
            None => token.to_string(),
        }
    }

    pub fn log_challenge_issued(challenge_id: &str, session_id: Option<&str>) {
        debug!("🎲 Issued challenge {challenge_id} (session: {session_id:?})");
    }

    pub fn log_attestation_accepted(key_id: &str, app_id: &str) {
        info!("✅ Attested key {key_id} for {app_id}");
    }

    pub fn log_assertion_accepted(key_id: &str, counter: u32) {
        info!("✅ Assertion accepted for key {key_id} at counter {counter}");
    }

    /// Verification failures; replays go to the security target
    pub fn log_verification_failure(operation: &str, key_id: &str, error: &VerificationError) {
        match error {
            VerificationError::ReplayDetected {
                stored, received, ..
            } => {
                warn!(
                    target: SECURITY_TARGET,
                    "🚨 Replay detected on {operation} for key {key_id}: received counter {received}, stored {stored}"
                );
            }
            VerificationError::Storage(detail) => {
                warn!("❌ {operation} for key {key_id} hit a storage failure: {detail}");
            }
            other => {
                info!("❌ {operation} rejected for key {key_id}: {other}");
            }
        }
    }

    pub fn log_credential_revoked(key_id: &str) {
        warn!(target: SECURITY_TARGET, "🔒 Credential {key_id} revoked");
    }

    pub fn log_devicecheck_request(endpoint: &str, device_token: &str) {
        info!(
            "🔄 DeviceCheck {endpoint} for token {}",
            Self::redact_token(device_token)
        );
    }

    pub fn log_devicecheck_response(endpoint: &str, status: u16, body: &str) {
        debug!("DeviceCheck {endpoint} answered {status}: {body}");
    }

    pub fn log_devicecheck_failure(endpoint: &str, error: &DeviceCheckError) {
        warn!("❌ DeviceCheck {endpoint} failed: {error}");
    }

    /// Query degraded to empty bits because auth is not configured
    pub fn log_query_degraded(error: &DeviceCheckError) {
        warn!("⏭️  DeviceCheck query skipped, returning empty bits: {error}");
    }

    pub fn log_auth_token_refreshed(expires_at: i64) {
        debug!("🔑 Generated DeviceCheck auth token valid until {expires_at}");
    }
}
