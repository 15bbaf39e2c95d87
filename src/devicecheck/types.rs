//! Request and response bodies exchanged with Apple's DeviceCheck API

use serde::{Deserialize, Serialize};

/// Body shared by `query_two_bits` and `validate_device_token`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceTokenRequest {
    pub device_token: String,
    pub transaction_id: String,
    /// Milliseconds since the unix epoch
    pub timestamp: i64,
}

/// Body of `update_two_bits`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateBitsRequest {
    #[serde(flatten)]
    pub base: DeviceTokenRequest,
    pub bit0: bool,
    pub bit1: bool,
}

/// Two bits Apple keeps per device; absent until first set
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceBits {
    pub bit0: Option<bool>,
    pub bit1: Option<bool>,
    /// Month of the last update, `YYYY-MM`
    pub last_update_time: Option<String>,
}

impl DeviceBits {
    /// All-nil bits, returned when Apple has nothing or auth is not configured
    #[must_use]
    pub fn unknown() -> Self {
        Self::default()
    }
}

impl DeviceTokenRequest {
    /// Fresh transaction id and timestamp for one outbound call
    #[must_use]
    pub fn new(device_token: &str) -> Self {
        Self {
            device_token: device_token.to_string(),
            transaction_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
