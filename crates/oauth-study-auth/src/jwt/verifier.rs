//! Signature and registered-claim verification
//!
//! Verification always completes before any claim is trusted:
//!
//! 1. exactly three dot-separated segments
//! 2. header decodes and declares an allowlisted asymmetric algorithm
//! 3. the key named by `kid` is resolved for the expected issuer, with one
//!    forced refresh if the cached set does not contain it
//! 4. signature, `iss`, `aud` (when expected), `exp`, `nbf` verified by
//!    `jsonwebtoken` with a fixed clock-skew window
//! 5. `iat` rejected if it lies in the future beyond the same window

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt as _;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header};
use tracing::{debug, error, warn};

use super::jwks::{CachePolicy, KeyResolver, KeySet};
use crate::claims::Claims;
use crate::error::{AuthError, ClaimValidationError, KeyFetchError, MalformedTokenError, SignatureError};

/// Asymmetric algorithms accepted by default
///
/// HMAC is excluded: a resource server holding a shared secret could mint
/// tokens itself. `none` is never representable in `jsonwebtoken`.
pub const DEFAULT_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// Tunables for [`TokenVerifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationSettings {
    /// Fixed tolerance applied to `exp`, `nbf` and `iat`
    pub clock_skew: Duration,
    /// Header algorithms that may be verified
    pub allowed_algorithms: Vec<Algorithm>,
    /// Deadline for each key resolver call
    pub resolve_timeout: Duration,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            clock_skew: Duration::from_secs(5),
            allowed_algorithms: DEFAULT_ALGORITHMS.to_vec(),
            resolve_timeout: Duration::from_secs(10),
        }
    }
}

/// Verifies compact JWS access tokens against a [`KeyResolver`]
///
/// Stateless apart from the injected resolver; safe to share across tasks.
#[derive(Clone)]
pub struct TokenVerifier {
    resolver: Arc<dyn KeyResolver>,
    pub(crate) settings: VerificationSettings,
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("resolver", &self.resolver)
            .field("settings", &self.settings)
            .finish()
    }
}

impl TokenVerifier {
    /// Verifier with default settings
    pub fn new(resolver: Arc<dyn KeyResolver>) -> Self {
        Self::with_settings(resolver, VerificationSettings::default())
    }

    /// Verifier with explicit settings
    pub fn with_settings(resolver: Arc<dyn KeyResolver>, settings: VerificationSettings) -> Self {
        Self { resolver, settings }
    }

    /// Active settings
    pub fn settings(&self) -> &VerificationSettings {
        &self.settings
    }

    /// Verify `token` and decode its claims
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] classifying the first failed check. Resolver
    /// faults, including panics and timeouts, are returned as errors rather
    /// than propagated.
    pub async fn verify(
        &self,
        token: &str,
        expected_issuer: &str,
        expected_audience: Option<&str>,
    ) -> Result<Claims, AuthError> {
        let segments = token.split('.').count();
        if segments != 3 {
            return Err(MalformedTokenError::SegmentCount { found: segments }.into());
        }

        let header = decode_header(token).map_err(|e| {
            debug!(error = %e, "Failed to decode JWT header");
            MalformedTokenError::Header(e.to_string())
        })?;

        if !self.settings.allowed_algorithms.contains(&header.alg) {
            warn!(
                algorithm = ?header.alg,
                allowed = ?self.settings.allowed_algorithms,
                "JWT algorithm not allowed"
            );
            return Err(SignatureError::UnsupportedAlgorithm(format!("{:?}", header.alg)).into());
        }

        let decoding_key = self.decoding_key(&header, expected_issuer).await?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.settings.clock_skew.as_secs();
        validation.validate_nbf = true;
        validation.set_issuer(&[expected_issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        match expected_audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let claims = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|e| {
                let err = classify(&e);
                warn!(
                    error = %e,
                    reason = %err,
                    issuer = %expected_issuer,
                    "JWT validation failed"
                );
                err
            })?
            .claims;

        if let Some(iat) = claims.iat {
            let now = jsonwebtoken::get_current_timestamp();
            if iat > now.saturating_add(self.settings.clock_skew.as_secs()) {
                warn!(iat = iat, now = now, "JWT issued in the future");
                return Err(ClaimValidationError::IssuedInFuture.into());
            }
        }

        debug!(
            issuer = %expected_issuer,
            subject = %claims.sub,
            algorithm = ?header.alg,
            "JWT verification successful"
        );

        Ok(claims)
    }

    /// Find the verification key, forcing one refresh on a miss
    async fn decoding_key(&self, header: &Header, issuer: &str) -> Result<DecodingKey, AuthError> {
        let kid = header.kid.as_deref();

        let cached = self.resolve(issuer, CachePolicy::PreferCached).await?;
        if let Some(jwk) = select_key(&cached, kid) {
            return to_decoding_key(jwk, kid);
        }

        warn!(issuer = issuer, key_id = ?kid, "Key ID not found in JWKS, refreshing once");
        let refreshed = self.resolve(issuer, CachePolicy::ForceRefresh).await?;
        match select_key(&refreshed, kid) {
            Some(jwk) => to_decoding_key(jwk, kid),
            None => {
                error!(issuer = issuer, key_id = ?kid, "Key ID not found in JWKS after refresh");
                Err(SignatureError::UnknownKey {
                    kid: kid.map(str::to_owned),
                }
                .into())
            }
        }
    }

    /// Call the resolver under the deadline, containing panics
    async fn resolve(&self, issuer: &str, policy: CachePolicy) -> Result<Arc<KeySet>, AuthError> {
        let call = AssertUnwindSafe(self.resolver.resolve(issuer, policy)).catch_unwind();

        match tokio::time::timeout(self.settings.resolve_timeout, call).await {
            Ok(Ok(Ok(keys))) => Ok(keys),
            Ok(Ok(Err(e))) => {
                error!(issuer = issuer, error = %e, "Key resolution failed");
                Err(AuthError::KeyResolution(e))
            }
            Ok(Err(_panic)) => {
                error!(issuer = issuer, "Key resolver panicked");
                Err(AuthError::Internal)
            }
            Err(_elapsed) => {
                error!(
                    issuer = issuer,
                    timeout_ms = self.settings.resolve_timeout.as_millis(),
                    "Key resolution timed out"
                );
                Err(AuthError::KeyResolution(KeyFetchError::Timeout))
            }
        }
    }
}

fn select_key<'a>(keys: &'a KeySet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => keys.find(kid),
        None => keys.sole_key(),
    }
}

fn to_decoding_key(jwk: &Jwk, kid: Option<&str>) -> Result<DecodingKey, AuthError> {
    DecodingKey::from_jwk(jwk).map_err(|e| {
        error!(key_id = ?kid, error = %e, "Failed to create decoding key from JWK");
        SignatureError::UnusableKey(e.to_string()).into()
    })
}

/// Map a `jsonwebtoken` failure onto the error taxonomy
fn classify(err: &JwtError) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => ClaimValidationError::Expired.into(),
        ErrorKind::ImmatureSignature => ClaimValidationError::NotYetValid.into(),
        ErrorKind::InvalidIssuer => ClaimValidationError::IssuerMismatch.into(),
        ErrorKind::InvalidAudience => ClaimValidationError::AudienceMismatch.into(),
        ErrorKind::MissingRequiredClaim(claim) => {
            ClaimValidationError::MissingClaim(claim.clone()).into()
        }
        ErrorKind::InvalidSignature => SignatureError::InvalidSignature.into(),
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            SignatureError::UnsupportedAlgorithm(err.to_string()).into()
        }
        ErrorKind::InvalidKeyFormat => SignatureError::UnusableKey(err.to_string()).into(),
        ErrorKind::Json(_) | ErrorKind::InvalidClaimFormat(_) => {
            ClaimValidationError::InvalidShape(err.to_string()).into()
        }
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
            MalformedTokenError::Payload(err.to_string()).into()
        }
        _ => SignatureError::InvalidSignature.into(),
    }
}
