//! Error taxonomy for token authorization
//!
//! Every failure the authorizer can hit is classified into one of five
//! families. None of them crosses the [`Authorizer`](crate::Authorizer)
//! boundary as an `Err`: they are folded into a
//! [`Decision`](crate::Decision) so callers only branch on three variants.
//!
//! | family                   | decision        | retried                    |
//! |--------------------------|-----------------|----------------------------|
//! | [`MalformedTokenError`]  | Unauthenticated | never                      |
//! | [`SignatureError`]       | Unauthenticated | one key refresh on unknown `kid` |
//! | [`ClaimValidationError`] | Unauthenticated | never                      |
//! | [`KeyFetchError`]        | Unauthenticated | caller may retry later     |
//! | [`PolicyViolation`]      | Forbidden       | never                      |
//!
//! All types carry plain strings rather than foreign error values so they
//! are `Clone + Eq` and can live inside a `Decision`.

use thiserror::Error;

/// Result type for key resolution
pub type KeyFetchResult<T> = std::result::Result<T, KeyFetchError>;

/// Structurally invalid token
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedTokenError {
    /// Not exactly three dot-separated segments
    #[error("malformed token")]
    SegmentCount {
        /// Number of segments actually found
        found: usize,
    },

    /// The header segment is not base64url JSON
    #[error("malformed token header")]
    Header(String),

    /// The payload segment is not base64url JSON
    #[error("malformed token payload")]
    Payload(String),
}

/// Cryptographic verification failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Header declares an algorithm outside the allowlist
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// No key matched the token's key id, even after one refresh
    #[error("signature verification failed: unknown key id")]
    UnknownKey {
        /// The `kid` from the token header (if any)
        kid: Option<String>,
    },

    /// The matching JWK could not be turned into a verification key
    #[error("signature verification failed: unusable key")]
    UnusableKey(String),

    /// Signature does not verify with the resolved key
    #[error("invalid signature")]
    InvalidSignature,
}

/// Registered claim rejected after the signature verified
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimValidationError {
    /// `exp` is in the past beyond the skew window
    #[error("token expired")]
    Expired,

    /// `nbf` is in the future beyond the skew window
    #[error("token not yet valid")]
    NotYetValid,

    /// `iat` is in the future beyond the skew window
    #[error("token issued in the future")]
    IssuedInFuture,

    /// `iss` differs from the expected issuer
    #[error("issuer mismatch")]
    IssuerMismatch,

    /// `aud` does not contain the expected audience
    #[error("audience mismatch")]
    AudienceMismatch,

    /// A required claim (`sub`, `iss`, `exp`) is absent
    #[error("missing required claim: {0}")]
    MissingClaim(String),

    /// Claims do not have the expected shape
    #[error("invalid claims: {0}")]
    InvalidShape(String),
}

/// Key discovery endpoint could not be reached or parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyFetchError {
    /// Network failure talking to the endpoint
    #[error("key endpoint unreachable: {0}")]
    Unreachable(String),

    /// Endpoint answered with a non-success status
    #[error("key endpoint returned status {0}")]
    Status(u16),

    /// Endpoint body is not a valid key set or discovery document
    #[error("malformed key set: {0}")]
    Malformed(String),

    /// The bounded fetch deadline elapsed
    #[error("key resolution timed out")]
    Timeout,

    /// Endpoint URL rejected (plain HTTP to a non-loopback host, bad URL)
    #[error("insecure or invalid key endpoint: {0}")]
    InvalidEndpoint(String),

    /// OpenID discovery failed or returned an inconsistent document
    #[error("discovery failed: {0}")]
    Discovery(String),
}

/// Authenticated token lacking a required scope or role
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    /// Required scope absent from the token's scope set
    #[error("missing required scope: {0}")]
    MissingScope(String),

    /// Required role absent from the token's role set
    #[error("missing required role: {0}")]
    MissingRole(String),
}

impl PolicyViolation {
    /// The scope or role that was required
    pub fn requirement(&self) -> &str {
        match self {
            Self::MissingScope(name) | Self::MissingRole(name) => name,
        }
    }
}

/// Reason a token did not authenticate
///
/// `Display` is the short, machine-readable reason handed to clients. Key
/// resolution failures and internal faults deliberately collapse to
/// generic strings; the detail stays reachable through `source()` for logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Empty or absent bearer token
    #[error("missing token")]
    MissingToken,

    /// Structural failure
    #[error(transparent)]
    Malformed(#[from] MalformedTokenError),

    /// Cryptographic failure
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Registered-claim failure
    #[error(transparent)]
    Claims(#[from] ClaimValidationError),

    /// Key resolver failure
    #[error("key resolution failed")]
    KeyResolution(#[source] KeyFetchError),

    /// Unclassified fault inside the authorizer or resolver
    #[error("authentication failed")]
    Internal,
}

impl From<KeyFetchError> for AuthError {
    fn from(err: KeyFetchError) -> Self {
        Self::KeyResolution(err)
    }
}

/// Authorization Code + PKCE client failures
#[derive(Debug, Error)]
pub enum ClientError {
    /// An endpoint or redirect URL is not a valid URL
    #[error("invalid URL for {name}: {message}")]
    InvalidUrl {
        /// Which URL
        name: &'static str,
        /// Parser message
        message: String,
    },

    /// The callback's `state` differs from the one we sent
    #[error("state mismatch")]
    StateMismatch,

    /// The callback carries neither `code` nor `error`
    #[error("authorization response has no code")]
    MissingCode,

    /// The provider answered with an OAuth error
    #[error("{error}{}", .description.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Provider {
        /// OAuth error code
        error: String,
        /// Human-readable description
        description: Option<String>,
    },

    /// Credential login did not end at the redirect URI
    #[error("login failed: {0}")]
    LoginFailed(String),

    /// Token endpoint response could not be parsed
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// Network failure
    #[error("request failed: {0}")]
    Transport(String),

    /// Discovery failed
    #[error(transparent)]
    Discovery(#[from] KeyFetchError),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(std::path::PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] config::ConfigError),

    /// A value parsed but makes no sense (e.g. an unparsable URL)
    #[error("Invalid configuration value for {key}: {message}")]
    Invalid {
        /// Configuration key
        key: &'static str,
        /// What is wrong with it
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_key_fetch_reason_is_generic() {
        let err = AuthError::from(KeyFetchError::Unreachable("connection refused".into()));
        assert_eq!(err.to_string(), "key resolution failed");
        assert!(
            err.source()
                .expect("detail kept as source")
                .to_string()
                .contains("connection refused")
        );
    }

    #[test]
    fn test_malformed_reason() {
        let err = AuthError::from(MalformedTokenError::SegmentCount { found: 2 });
        assert_eq!(err.to_string(), "malformed token");
    }

    #[test]
    fn test_policy_violation_names_requirement() {
        let scope = PolicyViolation::MissingScope("protected-api.read".into());
        let role = PolicyViolation::MissingRole("service.writer".into());

        assert_eq!(scope.to_string(), "missing required scope: protected-api.read");
        assert_eq!(role.to_string(), "missing required role: service.writer");
        assert_eq!(role.requirement(), "service.writer");
    }

    #[test]
    fn test_claim_reasons() {
        assert!(
            AuthError::from(ClaimValidationError::Expired)
                .to_string()
                .contains("expired")
        );
        assert_eq!(
            AuthError::from(ClaimValidationError::MissingClaim("sub".into())).to_string(),
            "missing required claim: sub"
        );
    }
}
