//! HTTP error responses
//!
//! 401 and 403 responses carry a `WWW-Authenticate` challenge; the body
//! holds only the short reason, never resolver detail.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use oauth_study_auth::Decision;
use oauth_study_auth::server::{WwwAuthenticate, rejection_body};
use serde_json::json;
use thiserror::Error;

/// Request rejected before or by the authorizer
#[derive(Debug, Error)]
pub enum ApiError {
    /// No usable `Authorization: Bearer` header; the authorizer was not called
    #[error("missing authorization")]
    MissingAuthorization,

    /// The authorizer said no
    #[error("request rejected: {}", .0.reason().unwrap_or_default())]
    Rejected(Decision),

    /// Request body is not what the route expects
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Anything else
    #[error("internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::MissingAuthorization => {
                let mut resp = (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": "missing authorization" })),
                )
                    .into_response();
                resp.headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                resp
            }
            Self::Rejected(decision) => {
                let Some(body) = rejection_body(&decision) else {
                    return Self::Internal.into_response();
                };

                let mut resp = (decision.status_code(), Json(body)).into_response();

                if let Some(challenge) = WwwAuthenticate::for_decision(&decision)
                    && let Ok(value) = HeaderValue::from_str(&challenge.build())
                {
                    resp.headers_mut().insert(header::WWW_AUTHENTICATE, value);
                }

                resp
            }
            Self::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "invalid_request",
                    "error_description": message,
                })),
            )
                .into_response(),
            Self::Internal => internal_error(),
        }
    }
}

/// Generic 500 response
pub fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
        .into_response()
}
