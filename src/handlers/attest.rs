//! App Attest handlers
//!
//! Challenge issuance, attestation registration and assertion verification.

use super::types::{AssertionRequest, AttestationRequest, ChallengeQuery, ChallengeResponse};
use super::AppState;
use crate::attest::VerificationError;
use crate::utils::responses::ResponseBuilder;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Map a verification failure to its HTTP status and error envelope
#[must_use]
pub fn verification_error_response(err: &VerificationError, expose_details: bool) -> HttpResponse {
    let builder = match err {
        VerificationError::InvalidInput(_)
        | VerificationError::AttestationInvalid { .. }
        | VerificationError::AssertionInvalid { .. } => ResponseBuilder::bad_request(),
        VerificationError::ChallengeExpiredOrUsed(_)
        | VerificationError::DuplicateKey(_)
        | VerificationError::ReplayDetected { .. } => ResponseBuilder::conflict(),
        VerificationError::UnknownKey(_) => ResponseBuilder::not_found(),
        VerificationError::Storage(_) => ResponseBuilder::internal_server_error(),
    };

    let message = if expose_details && !matches!(err, VerificationError::Storage(_)) {
        err.to_string()
    } else {
        err.public_message().to_string()
    };

    builder
        .with_error_code(err.code())
        .with_message(&message)
        .with_reason(err.check_code().filter(|_| expose_details))
        .build()
}

/// `GET /api/attest/challenge`
pub async fn get_challenge(
    query: web::Query<ChallengeQuery>,
    state: web::Data<AppState>,
) -> HttpResponse {
    match state.attest.issue_challenge(query.session_id.as_deref()) {
        Ok(challenge) => ResponseBuilder::ok(&ChallengeResponse {
            challenge: challenge.value,
            expires_at: challenge.expires_at,
        }),
        Err(e) => verification_error_response(&e, state.expose_failure_details),
    }
}

/// `POST /api/attest/validate`
pub async fn validate_attestation(
    body: web::Json<AttestationRequest>,
    state: web::Data<AppState>,
) -> HttpResponse {
    match state
        .attest
        .register_for_session(
            &body.key_id,
            &body.attestation,
            &body.challenge,
            body.session_id.as_deref(),
        )
        .await
    {
        Ok(_) => ResponseBuilder::success("Attestation verified successfully", json!({})),
        Err(e) => verification_error_response(&e, state.expose_failure_details),
    }
}

/// `POST /api/attest/assertion`
pub async fn validate_assertion(
    body: web::Json<AssertionRequest>,
    state: web::Data<AppState>,
) -> HttpResponse {
    match state
        .attest
        .assert_for_session(
            &body.key_id,
            &body.assertion,
            &body.client_data,
            body.session_id.as_deref(),
        )
        .await
    {
        Ok(counter) => ResponseBuilder::success(
            "Assertion verified successfully",
            json!({ "counter": counter }),
        ),
        Err(e) => verification_error_response(&e, state.expose_failure_details),
    }
}
