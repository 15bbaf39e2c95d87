// HTTP request handlers for the App Attest and DeviceCheck API
pub mod attest;
pub mod device;
pub mod health;
pub mod types;


use crate::attest::AppAttestService;
use crate::devicecheck::DeviceTokenGateway;
use crate::utils::responses::ResponseBuilder;
use actix_web::{
    error::{JsonPayloadError, QueryPayloadError},
    web, HttpRequest,
};
use std::sync::Arc;

// Re-export the main handler functions
pub use attest::{get_challenge, validate_assertion, validate_attestation};
pub use device::{query_device_bits, update_device_bits, validate_device_token};
pub use health::{health, index};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub attest: Arc<AppAttestService>,
    pub gateway: Arc<dyn DeviceTokenGateway>,
    /// Include the failed check's sub-code in error bodies
    pub expose_failure_details: bool,
}

impl AppState {
    #[must_use]
    pub fn new(
        attest: Arc<AppAttestService>,
        gateway: Arc<dyn DeviceTokenGateway>,
        expose_failure_details: bool,
    ) -> Self {
        Self {
            attest,
            gateway,
            expose_failure_details,
        }
    }
}

/// Turn body deserialization failures into the `invalid_input` envelope
#[must_use]
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err: JsonPayloadError, _req: &HttpRequest| {
        let response = ResponseBuilder::invalid_body(&err.to_string());
        actix_web::error::InternalError::from_response(err, response).into()
    })
}

/// Same envelope for query strings that do not deserialize
#[must_use]
pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err: QueryPayloadError, _req: &HttpRequest| {
        let response = ResponseBuilder::invalid_body(&err.to_string());
        actix_web::error::InternalError::from_response(err, response).into()
    })
}

pub fn configure_services(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        // System endpoints
        .route("/", web::get().to(index))
        .route("/health", web::get().to(health))
        // App Attest endpoints
        .route("/api/attest/challenge", web::get().to(get_challenge))
        .route("/api/attest/validate", web::post().to(validate_attestation))
        .route("/api/attest/assertion", web::post().to(validate_assertion))
        // DeviceCheck endpoints
        .route("/api/device/query", web::post().to(query_device_bits))
        .route("/api/device/update", web::post().to(update_device_bits))
        .route("/api/device/validate", web::post().to(validate_device_token));
}
