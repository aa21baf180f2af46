//! Authorization decision

use http::StatusCode;
use serde::Serialize;

use crate::claims::{Claims, RoleSet, ScopeSet};
use crate::error::{AuthError, PolicyViolation};

/// An authenticated and authorized token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Authorization {
    /// Verified claims
    pub claims: Claims,
    /// Deduplicated union of all role claims
    pub roles: RoleSet,
    /// Granted scopes
    pub scopes: ScopeSet,
}

impl Authorization {
    /// The token's subject
    pub fn subject(&self) -> &str {
        &self.claims.sub
    }
}

/// Outcome of [`Authorizer::authorize`](crate::Authorizer::authorize)
///
/// Default is deny: only a fully verified token that satisfies its policy
/// ever becomes `Authorized`.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Proceed
    Authorized(Authorization),
    /// Token missing, malformed, unverifiable or invalid
    Unauthenticated(AuthError),
    /// Valid token without the required scope or role
    Forbidden(PolicyViolation),
}

impl Decision {
    /// Whether the caller may proceed
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized(_))
    }

    /// The authorization, if granted
    pub fn authorization(&self) -> Option<&Authorization> {
        match self {
            Self::Authorized(auth) => Some(auth),
            _ => None,
        }
    }

    /// Short reason for a rejection
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Authorized(_) => None,
            Self::Unauthenticated(err) => Some(err.to_string()),
            Self::Forbidden(violation) => Some(violation.to_string()),
        }
    }

    /// HTTP status the service layer should answer with
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authorized(_) => StatusCode::OK,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }
}
