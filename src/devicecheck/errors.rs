use std::time::Duration;
use thiserror::Error;

/// Failures talking to Apple's DeviceCheck API
#[derive(Debug, Error)]
pub enum DeviceCheckError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Team id, key id or private key missing, placeholder or unreadable
    #[error("DeviceCheck authentication is misconfigured: {0}")]
    AuthMisconfigured(String),

    /// Transport failure (`status` is `None`) or a non-200 answer
    #[error("Apple DeviceCheck API error{}: {body}", status_suffix(.status))]
    RemoteApi { status: Option<u16>, body: String },

    #[error("Apple DeviceCheck API did not answer within {0:?}")]
    RemoteTimeout(Duration),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl DeviceCheckError {
    /// Stable error code for API responses
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::AuthMisconfigured(_) => "auth_misconfigured",
            Self::RemoteApi { .. } => "remote_api_error",
            Self::RemoteTimeout(_) => "remote_timeout",
        }
    }

    /// Upstream HTTP status, when Apple answered
    #[must_use]
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::RemoteApi { status, .. } => *status,
            _ => None,
        }
    }
}
