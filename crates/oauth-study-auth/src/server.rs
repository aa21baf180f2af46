//! Resource-server helpers
//!
//! Bearer token extraction from the `Authorization` header, RFC 6750
//! `WWW-Authenticate` challenges, and the JSON rejection body for a
//! [`Decision`].

use serde_json::{Value, json};
use thiserror::Error;

use crate::decision::Decision;
use crate::error::PolicyViolation;

/// `Authorization` header could not yield a bearer token
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BearerError {
    /// Scheme is not `Bearer`
    #[error("authorization scheme must be Bearer")]
    WrongScheme,

    /// `Bearer` with nothing after it
    #[error("bearer token is empty")]
    Empty,

    /// Token contains whitespace
    #[error("bearer token must not contain whitespace")]
    Whitespace,
}

/// Extract the token from an `Authorization: Bearer <token>` header value
///
/// The scheme is matched case-insensitively. Surrounding whitespace is
/// ignored; whitespace inside the token is not.
///
/// # Errors
///
/// Returns [`BearerError`] when the scheme is wrong or the token is empty
/// or contains whitespace.
///
/// # Example
///
/// ```
/// use oauth_study_auth::server::extract_bearer_token;
///
/// assert_eq!(extract_bearer_token("Bearer abc.def.ghi"), Ok("abc.def.ghi"));
/// assert!(extract_bearer_token("Basic dXNlcjpwYXNz").is_err());
/// ```
pub fn extract_bearer_token(header_value: &str) -> Result<&str, BearerError> {
    let value = header_value.trim();

    let (scheme, rest) = match value.split_once(char::is_whitespace) {
        Some((scheme, rest)) => (scheme, rest.trim()),
        None => (value, ""),
    };

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(BearerError::WrongScheme);
    }
    if rest.is_empty() {
        return Err(BearerError::Empty);
    }
    if rest.contains(char::is_whitespace) {
        return Err(BearerError::Whitespace);
    }

    Ok(rest)
}

/// RFC 6750 error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerErrorCode {
    /// Malformed request
    InvalidRequest,
    /// Token missing, expired, revoked or otherwise invalid
    InvalidToken,
    /// Token valid but lacks the needed privilege
    InsufficientScope,
}

impl BearerErrorCode {
    /// Wire representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidToken => "invalid_token",
            Self::InsufficientScope => "insufficient_scope",
        }
    }
}

/// `WWW-Authenticate` challenge builder
///
/// Produces values like:
/// ```text
/// Bearer realm="oauth-study", error="insufficient_scope", error_description="missing required scope: protected-api.write", scope="protected-api.write"
/// ```
#[derive(Debug, Clone, Default)]
pub struct WwwAuthenticate {
    realm: Option<String>,
    error: Option<BearerErrorCode>,
    error_description: Option<String>,
    scope: Option<String>,
}

impl WwwAuthenticate {
    /// Bare `Bearer` challenge
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the protection realm
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Set the error code and description
    pub fn with_error(mut self, code: BearerErrorCode, description: impl Into<String>) -> Self {
        self.error = Some(code);
        self.error_description = Some(description.into());
        self
    }

    /// Set the scope needed to access the resource
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Challenge for a rejected [`Decision`]; `None` if it was authorized
    pub fn for_decision(decision: &Decision) -> Option<Self> {
        match decision {
            Decision::Authorized(_) => None,
            Decision::Unauthenticated(err) => {
                Some(Self::new().with_error(BearerErrorCode::InvalidToken, err.to_string()))
            }
            Decision::Forbidden(violation) => {
                let challenge = Self::new()
                    .with_error(BearerErrorCode::InsufficientScope, violation.to_string());
                Some(match violation {
                    PolicyViolation::MissingScope(scope) => challenge.with_scope(scope.clone()),
                    PolicyViolation::MissingRole(_) => challenge,
                })
            }
        }
    }

    /// Build the header value
    pub fn build(&self) -> String {
        let mut params = Vec::new();

        if let Some(realm) = &self.realm {
            params.push(format!("realm=\"{}\"", quote(realm)));
        }
        if let Some(error) = self.error {
            params.push(format!("error=\"{}\"", error.as_str()));
        }
        if let Some(description) = &self.error_description {
            params.push(format!("error_description=\"{}\"", quote(description)));
        }
        if let Some(scope) = &self.scope {
            params.push(format!("scope=\"{}\"", quote(scope)));
        }

        if params.is_empty() {
            "Bearer".to_string()
        } else {
            format!("Bearer {}", params.join(", "))
        }
    }
}

/// Escape for a quoted-string; characters outside printable ASCII are
/// dropped so the result is always a valid header value
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len());
    for c in value.chars().filter(|c| matches!(c, ' '..='~')) {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted
}

/// JSON body for a rejected [`Decision`]; `None` if it was authorized
pub fn rejection_body(decision: &Decision) -> Option<Value> {
    match decision {
        Decision::Authorized(_) => None,
        Decision::Unauthenticated(err) => Some(json!({
            "error": "unauthorized",
            "error_description": err.to_string(),
        })),
        Decision::Forbidden(violation) => Some(json!({
            "error": "forbidden",
            "error_description": violation.to_string(),
        })),
    }
}
