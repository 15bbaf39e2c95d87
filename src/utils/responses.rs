//! HTTP response handling system
//!
//! Every body carries a boolean `success` and a human-readable `message`.
//! Failures add a stable `error` code and, when failure details are exposed,
//! a `reason` naming the verification check that failed.

use actix_web::{http::header, HttpResponse};
use serde_json::{json, Value};

/// Unified response builder
pub struct ResponseBuilder;

impl ResponseBuilder {
    // ===============================
    // ERROR RESPONSE METHODS
    // ===============================

    /// `400 Bad Request`
    #[must_use]
    pub fn bad_request() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::BadRequest)
    }

    /// `404 Not Found`
    #[must_use]
    pub fn not_found() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::NotFound)
    }

    /// `409 Conflict`
    #[must_use]
    pub fn conflict() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::Conflict)
    }

    /// `500 Internal Server Error`
    #[must_use]
    pub fn internal_server_error() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::InternalServerError)
    }

    /// `502 Bad Gateway`
    #[must_use]
    pub fn bad_gateway() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::BadGateway)
    }

    /// `504 Gateway Timeout`
    #[must_use]
    pub fn gateway_timeout() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::GatewayTimeout)
    }

    // ===============================
    // SUCCESS RESPONSE METHODS
    // ===============================

    /// `200 OK` with a JSON body
    #[must_use]
    pub fn ok<T: serde::Serialize>(data: &T) -> HttpResponse {
        HttpResponse::Ok().json(data)
    }

    /// `200 OK` with `{success: true, message}` plus extra fields
    #[must_use]
    pub fn success(message: &str, fields: Value) -> HttpResponse {
        let mut body = json!({
            "success": true,
            "message": message
        });
        if let Value::Object(map) = fields {
            for (key, value) in map {
                body[key] = value;
            }
        }
        Self::ok(&body)
    }

    // ===============================
    // CONVENIENCE METHODS
    // ===============================

    /// Malformed JSON body or query string
    #[must_use]
    pub fn invalid_body(detail: &str) -> HttpResponse {
        Self::bad_request()
            .with_error_code("invalid_input")
            .with_message(&format!("The request is malformed or invalid: {detail}"))
            .build()
    }
}

// ===============================
// BUILDER TYPES
// ===============================

/// Builder for error responses with fluent interface
pub struct ErrorResponseBuilder {
    error_type: ErrorType,
    error_code: Option<String>,
    message: Option<String>,
    reason: Option<String>,
    additional_fields: Option<Value>,
}

/// Supported HTTP error response types
enum ErrorType {
    BadRequest,
    NotFound,
    Conflict,
    InternalServerError,
    BadGateway,
    GatewayTimeout,
}

impl ErrorType {
    fn default_code(&self) -> &'static str {
        match self {
            Self::BadRequest => "invalid_input",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InternalServerError => "server_error",
            Self::BadGateway => "remote_api_error",
            Self::GatewayTimeout => "remote_timeout",
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            Self::BadRequest => "The request is malformed or invalid",
            Self::NotFound => "The requested resource does not exist",
            Self::Conflict => "The request conflicts with the current state",
            Self::InternalServerError => "An internal server error occurred",
            Self::BadGateway => "Apple's DeviceCheck API returned an error",
            Self::GatewayTimeout => "Apple's DeviceCheck API did not respond in time",
        }
    }

    fn response(&self) -> actix_web::HttpResponseBuilder {
        match self {
            Self::BadRequest => HttpResponse::BadRequest(),
            Self::NotFound => HttpResponse::NotFound(),
            Self::Conflict => HttpResponse::Conflict(),
            Self::InternalServerError => HttpResponse::InternalServerError(),
            Self::BadGateway => HttpResponse::BadGateway(),
            Self::GatewayTimeout => HttpResponse::GatewayTimeout(),
        }
    }
}

// ===============================
// ERROR RESPONSE BUILDER IMPL
// ===============================

impl ErrorResponseBuilder {
    fn new(error_type: ErrorType) -> Self {
        Self {
            error_type,
            error_code: None,
            message: None,
            reason: None,
            additional_fields: None,
        }
    }

    /// Set a custom error code (e.g. "`replay_detected`")
    #[must_use]
    pub fn with_error_code(mut self, code: &str) -> Self {
        self.error_code = Some(code.to_string());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    /// Sub-code naming the failed check
    #[must_use]
    pub fn with_reason(mut self, reason: Option<&str>) -> Self {
        self.reason = reason.map(ToString::to_string);
        self
    }

    /// Add additional JSON fields to the response
    #[must_use]
    pub fn with_additional_fields(mut self, fields: Value) -> Self {
        self.additional_fields = Some(fields);
        self
    }

    /// Build the final `HttpResponse`
    #[must_use]
    pub fn build(self) -> HttpResponse {
        let mut body = json!({
            "success": false,
            "error": self.error_code.as_deref().unwrap_or(self.error_type.default_code()),
            "message": self.message.as_deref().unwrap_or(self.error_type.default_message()),
        });
        if let Some(reason) = self.reason {
            body["reason"] = Value::String(reason);
        }
        if let Some(Value::Object(map)) = self.additional_fields {
            for (key, value) in map {
                body[key] = value;
            }
        }

        self.error_type
            .response()
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use actix_web::http::StatusCode;

    async fn body_json(response: HttpResponse) -> Value {
        let bytes = to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[actix_web::test]
    async fn test_default_error_envelope() {
        let response = ResponseBuilder::bad_request().build();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "invalid_input");
        assert!(body["message"].is_string());
    }

    #[actix_web::test]
    async fn test_custom_error_with_reason() {
        let response = ResponseBuilder::conflict()
            .with_error_code("replay_detected")
            .with_message("Replay detected")
            .with_reason(Some("counter"))
            .with_additional_fields(json!({"counter": null}))
            .build();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"], "replay_detected");
        assert_eq!(body["reason"], "counter");
        assert!(body["counter"].is_null());
    }

    #[actix_web::test]
    async fn test_reason_omitted_when_hidden() {
        let response = ResponseBuilder::bad_request()
            .with_error_code("attestation_invalid")
            .with_reason(None)
            .build();
        let body = body_json(response).await;
        assert!(body.get("reason").is_none());
    }

    #[actix_web::test]
    async fn test_success_envelope() {
        let response = ResponseBuilder::success("ok", json!({"counter": 3}));
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["counter"], 3);
        assert_eq!(body["message"], "ok");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ResponseBuilder::not_found().build().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ResponseBuilder::internal_server_error().build().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ResponseBuilder::bad_gateway().build().status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ResponseBuilder::gateway_timeout().build().status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
