use super::types::{HealthResponse, IndexResponse};
use actix_web::{HttpResponse, Result};

/// Service banner with the running version
///
/// # Errors
/// Never fails; the `Result` matches the other handlers
pub async fn index() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(IndexResponse {
        message: "DeviceCheck and App Attest server is running".to_string(),
        version: crate::VERSION.to_string(),
    }))
}

/// Health check endpoint
///
/// # Errors
/// Returns an error if health status cannot be determined
pub async fn health() -> Result<HttpResponse> {
    let response = HealthResponse {
        status: "ok".to_string(),
        message: "DeviceCheck server is healthy".to_string(),
    };
    Ok(HttpResponse::Ok().json(response))
}
