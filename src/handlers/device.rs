//! DeviceCheck handlers
//!
//! Thin pass-through to the gateway; each request is exactly one call to
//! Apple.

use super::types::{DeviceTokenBody, UpdateBitsBody, ValidateTokenResponse};
use super::AppState;
use crate::devicecheck::DeviceCheckError;
use crate::utils::responses::ResponseBuilder;
use actix_web::{web, HttpResponse};
use serde_json::{json, Value};

/// Map a gateway failure to its HTTP status and error envelope
#[must_use]
pub fn devicecheck_error_response(err: &DeviceCheckError) -> HttpResponse {
    error_with_fields(err, json!({}))
}

fn error_with_fields(err: &DeviceCheckError, mut fields: Value) -> HttpResponse {
    fields["upstream_status"] = json!(err.upstream_status());
    let builder = match err {
        DeviceCheckError::InvalidInput(_) => ResponseBuilder::bad_request(),
        DeviceCheckError::AuthMisconfigured(_) => ResponseBuilder::internal_server_error(),
        DeviceCheckError::RemoteApi { .. } => ResponseBuilder::bad_gateway(),
        DeviceCheckError::RemoteTimeout(_) => ResponseBuilder::gateway_timeout(),
    };

    builder
        .with_error_code(err.code())
        .with_message(&err.to_string())
        .with_additional_fields(fields)
        .build()
}

/// `POST /api/device/query`
pub async fn query_device_bits(
    body: web::Json<DeviceTokenBody>,
    state: web::Data<AppState>,
) -> HttpResponse {
    match state.gateway.query_bits(&body.device_token).await {
        Ok(bits) => ResponseBuilder::ok(&bits),
        Err(e) => devicecheck_error_response(&e),
    }
}

/// `POST /api/device/update`
pub async fn update_device_bits(
    body: web::Json<UpdateBitsBody>,
    state: web::Data<AppState>,
) -> HttpResponse {
    match state
        .gateway
        .update_bits(&body.device_token, body.bit0, body.bit1)
        .await
    {
        Ok(()) => ResponseBuilder::success("Device bits updated", json!({})),
        Err(e) => devicecheck_error_response(&e),
    }
}

/// `POST /api/device/validate`
pub async fn validate_device_token(
    body: web::Json<DeviceTokenBody>,
    state: web::Data<AppState>,
) -> HttpResponse {
    match state.gateway.validate_token(&body.device_token).await {
        Ok(is_valid) => ResponseBuilder::ok(&ValidateTokenResponse {
            is_valid,
            message: "Device token is valid".to_string(),
        }),
        Err(e) => error_with_fields(&e, json!({ "isValid": false })),
    }
}
