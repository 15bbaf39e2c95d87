//! Client for Apple's DeviceCheck two-bit API
//!
//! Every call is a single authenticated POST with a fresh transaction id.
//! Nothing is retried: `update_two_bits` mutates state on Apple's side, so
//! each client request maps to exactly one upstream attempt.

use super::auth::{AuthKeyConfig, AuthTokenProvider};
use super::errors::DeviceCheckError;
use super::types::{DeviceBits, DeviceTokenRequest, UpdateBitsRequest};
use crate::settings::DeviceCheckSettings;
use crate::utils::logging::LoggingHelper;
use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header, StatusCode};
use serde::Serialize;
use std::time::Duration;
use url::Url;

pub const QUERY_ENDPOINT: &str = "query_two_bits";
pub const UPDATE_ENDPOINT: &str = "update_two_bits";
pub const VALIDATE_ENDPOINT: &str = "validate_device_token";

/// Server-to-server DeviceCheck operations keyed by opaque device tokens
#[async_trait]
pub trait DeviceTokenGateway: Send + Sync {
    /// Read the two bits for a device
    ///
    /// Degrades to all-nil bits when auth is misconfigured or Apple's body
    /// is not the expected JSON.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput`, `RemoteApi` or `RemoteTimeout`
    async fn query_bits(&self, device_token: &str) -> Result<DeviceBits, DeviceCheckError>;

    /// Set both bits; any 200 counts as success
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput`, `AuthMisconfigured`, `RemoteApi` or `RemoteTimeout`
    async fn update_bits(
        &self,
        device_token: &str,
        bit0: bool,
        bit1: bool,
    ) -> Result<(), DeviceCheckError>;

    /// Ask Apple whether the token is valid; any 200 means it is
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput`, `AuthMisconfigured`, `RemoteApi` or `RemoteTimeout`
    async fn validate_token(&self, device_token: &str) -> Result<bool, DeviceCheckError>;
}

pub struct AppleDeviceCheckGateway {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    auth: AuthTokenProvider,
}

impl AppleDeviceCheckGateway {
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid URL or the HTTP client
    /// cannot be built
    pub fn new(base_url: &str, timeout: Duration, auth: AuthTokenProvider) -> anyhow::Result<Self> {
        let parsed = Url::parse(base_url)
            .with_context(|| format!("Invalid DeviceCheck base URL: {base_url}"))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build DeviceCheck HTTP client")?;

        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            timeout,
            auth,
        })
    }

    /// # Errors
    ///
    /// Same as [`Self::new`]
    pub fn from_settings(settings: &DeviceCheckSettings) -> anyhow::Result<Self> {
        let gateway = Self::new(
            &settings.devicecheck_base_url(),
            Duration::from_secs(settings.device_check.request_timeout_seconds),
            AuthTokenProvider::new(AuthKeyConfig::from_settings(settings)),
        )?;
        if let Err(e) = gateway.auth.config().validate() {
            log::warn!("⚠️  {e}; device endpoints will fail until it is configured");
        }
        Ok(gateway)
    }

    #[must_use]
    pub fn auth(&self) -> &AuthTokenProvider {
        &self.auth
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }

    /// POST `body` and return the response text of a 200 answer
    async fn post<T: Serialize + Sync>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<String, DeviceCheckError> {
        let token = self.auth.token()?;

        let response = self
            .client
            .post(self.endpoint_url(endpoint))
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(&e))?;
        LoggingHelper::log_devicecheck_response(endpoint, status.as_u16(), &text);

        if status != StatusCode::OK {
            if status == StatusCode::UNAUTHORIZED {
                self.auth.invalidate();
            }
            return Err(DeviceCheckError::RemoteApi {
                status: Some(status.as_u16()),
                body: text,
            });
        }
        Ok(text)
    }

    fn transport_error(&self, error: &reqwest::Error) -> DeviceCheckError {
        if error.is_timeout() {
            DeviceCheckError::RemoteTimeout(self.timeout)
        } else {
            DeviceCheckError::RemoteApi {
                status: None,
                body: error.to_string(),
            }
        }
    }
}

/// Device tokens are opaque to us but must be standard base64
fn require_token(device_token: &str) -> Result<(), DeviceCheckError> {
    if device_token.trim().is_empty() {
        return Err(DeviceCheckError::InvalidInput(
            "device_token must not be empty".to_string(),
        ));
    }
    STANDARD.decode(device_token).map_err(|_| {
        DeviceCheckError::InvalidInput("device_token is not valid base64".to_string())
    })?;
    Ok(())
}

fn log_failure<T>(endpoint: &str, result: Result<T, DeviceCheckError>) -> Result<T, DeviceCheckError> {
    if let Err(e) = &result {
        LoggingHelper::log_devicecheck_failure(endpoint, e);
    }
    result
}

#[async_trait]
impl DeviceTokenGateway for AppleDeviceCheckGateway {
    async fn query_bits(&self, device_token: &str) -> Result<DeviceBits, DeviceCheckError> {
        require_token(device_token)?;
        LoggingHelper::log_devicecheck_request(QUERY_ENDPOINT, device_token);

        let body = DeviceTokenRequest::new(device_token);
        let text = match self.post(QUERY_ENDPOINT, &body).await {
            Ok(text) => text,
            Err(e @ DeviceCheckError::AuthMisconfigured(_)) => {
                LoggingHelper::log_query_degraded(&e);
                return Ok(DeviceBits::unknown());
            }
            Err(e) => return log_failure(QUERY_ENDPOINT, Err(e)),
        };

        // Apple answers a plain-text "Failed to find bit state" for devices
        // whose bits were never set
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| {
            log::info!("DeviceCheck query body is not bit state, returning empty bits: {text}");
            DeviceBits::unknown()
        }))
    }

    async fn update_bits(
        &self,
        device_token: &str,
        bit0: bool,
        bit1: bool,
    ) -> Result<(), DeviceCheckError> {
        require_token(device_token)?;
        LoggingHelper::log_devicecheck_request(UPDATE_ENDPOINT, device_token);

        let body = UpdateBitsRequest {
            base: DeviceTokenRequest::new(device_token),
            bit0,
            bit1,
        };
        log_failure(UPDATE_ENDPOINT, self.post(UPDATE_ENDPOINT, &body).await).map(|_| ())
    }

    async fn validate_token(&self, device_token: &str) -> Result<bool, DeviceCheckError> {
        require_token(device_token)?;
        LoggingHelper::log_devicecheck_request(VALIDATE_ENDPOINT, device_token);

        let body = DeviceTokenRequest::new(device_token);
        log_failure(VALIDATE_ENDPOINT, self.post(VALIDATE_ENDPOINT, &body).await).map(|_| true)
    }
}
