//! Routes and the bearer-token guard

use std::any::Any;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, header},
    response::Response,
    routing::{get, post},
};
use oauth_study_auth::server::extract_bearer_token;
use oauth_study_auth::{Authorization, Decision, Policy};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::error::{ApiError, internal_error};
use crate::state::AppState;

/// Build the service
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/hello", get(hello))
        .route("/api/messages", post(create_message))
        .with_state(Arc::new(state))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
}

/// Authorize the request's bearer token against `policy`
///
/// A missing or malformed header is rejected here without calling the
/// authorizer.
///
/// # Errors
///
/// [`ApiError::MissingAuthorization`] or [`ApiError::Rejected`].
pub async fn require(
    state: &AppState,
    headers: &HeaderMap,
    policy: &Policy,
) -> Result<Authorization, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::MissingAuthorization)?;

    let token = extract_bearer_token(value).map_err(|e| {
        debug!(error = %e, "Unusable Authorization header");
        ApiError::MissingAuthorization
    })?;

    match state.resource.authorize(token, policy).await {
        Decision::Authorized(auth) => Ok(auth),
        rejected => Err(ApiError::Rejected(rejected)),
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Body of `GET /api/hello`
#[derive(Debug, Serialize, Deserialize)]
pub struct HelloResponse {
    /// Greeting
    pub message: String,
    /// Token subject
    pub subject: String,
    /// Sorted role set
    pub roles: Vec<String>,
    /// Sorted scope set
    pub scopes: Vec<String>,
    /// `iat`, seconds since the epoch
    pub issued_at: Option<u64>,
    /// `exp`, seconds since the epoch
    pub expires_at: u64,
}

async fn hello(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<HelloResponse>, ApiError> {
    let auth = require(&state, &headers, &state.read_policy).await?;

    Ok(Json(HelloResponse {
        message: "Hello from the protected API!".to_string(),
        subject: auth.subject().to_string(),
        roles: auth.roles.iter().map(str::to_owned).collect(),
        scopes: auth.scopes.iter().map(str::to_owned).collect(),
        issued_at: auth.claims.iat,
        expires_at: auth.claims.exp,
    }))
}

/// Body of `POST /api/messages`
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    /// Text to store
    pub message: String,
}

async fn create_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let auth = require(&state, &headers, &state.write_policy).await?;
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    debug!(subject = %auth.subject(), "Message accepted");

    Ok(Json(json!({
        "message": request.message,
        "subject": auth.subject(),
        "received_at": chrono::Utc::now().to_rfc3339(),
    })))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "Handler panicked");
    internal_error()
}
