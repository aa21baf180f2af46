//! Token authorizer
//!
//! Turns a raw bearer token plus a [`Policy`] into a [`Decision`]. Nothing
//! escapes as an error: every failure path, including resolver faults,
//! ends in `Unauthenticated` or `Forbidden`.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use tracing::{debug, info, warn};

use crate::decision::{Authorization, Decision};
use crate::error::AuthError;
use crate::jwt::{KeyResolver, TokenVerifier, VerificationSettings};
use crate::policy::Policy;

/// Stateless, reentrant bearer token authorizer
///
/// The only shared state is inside the injected [`KeyResolver`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use oauth_study_auth::{Authorizer, Decision, Policy};
/// use oauth_study_auth::jwt::JwksResolver;
///
/// # async fn run(token: &str) {
/// let authorizer = Authorizer::new(Arc::new(JwksResolver::new()));
/// let policy = Policy::role("service.reader").with_scope("protected-api.read");
///
/// match authorizer
///     .authorize(token, &policy, "http://localhost:8080/realms/oauth-study", None)
///     .await
/// {
///     Decision::Authorized(auth) => println!("hello {}", auth.subject()),
///     Decision::Unauthenticated(reason) => println!("401: {reason}"),
///     Decision::Forbidden(reason) => println!("403: {reason}"),
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Authorizer {
    verifier: TokenVerifier,
}

impl Authorizer {
    /// Authorizer with default verification settings
    pub fn new(resolver: Arc<dyn KeyResolver>) -> Self {
        Self {
            verifier: TokenVerifier::new(resolver),
        }
    }

    /// Authorizer with explicit verification settings
    pub fn with_settings(resolver: Arc<dyn KeyResolver>, settings: VerificationSettings) -> Self {
        Self {
            verifier: TokenVerifier::with_settings(resolver, settings),
        }
    }

    /// Set the clock-skew tolerance (default: 5 seconds)
    pub fn with_clock_skew(self, skew: Duration) -> Self {
        self.map_settings(|s| s.clock_skew = skew)
    }

    /// Set the algorithm allowlist
    ///
    /// Only asymmetric algorithms belong here.
    pub fn with_algorithms(self, algorithms: Vec<Algorithm>) -> Self {
        self.map_settings(|s| s.allowed_algorithms = algorithms)
    }

    /// Bound each key resolver call (default: 10 seconds)
    pub fn with_resolve_timeout(self, timeout: Duration) -> Self {
        self.map_settings(|s| s.resolve_timeout = timeout)
    }

    fn map_settings(mut self, f: impl FnOnce(&mut VerificationSettings)) -> Self {
        f(&mut self.verifier.settings);
        self
    }

    /// Active verification settings
    pub fn settings(&self) -> &VerificationSettings {
        self.verifier.settings()
    }

    /// Decide whether `raw_token` may perform an operation guarded by `policy`
    ///
    /// `raw_token` must already have its `Bearer ` prefix stripped. The
    /// token is never logged.
    pub async fn authorize(
        &self,
        raw_token: &str,
        policy: &Policy,
        expected_issuer: &str,
        expected_audience: Option<&str>,
    ) -> Decision {
        if raw_token.trim().is_empty() {
            debug!("Rejecting request without bearer token");
            return Decision::Unauthenticated(AuthError::MissingToken);
        }

        let claims = match self
            .verifier
            .verify(raw_token, expected_issuer, expected_audience)
            .await
        {
            Ok(claims) => claims,
            Err(err) => {
                info!(reason = %err, issuer = expected_issuer, "Token rejected");
                return Decision::Unauthenticated(err);
            }
        };

        let roles = claims.role_set();
        let scopes = claims.scope_set();

        if let Err(violation) = policy.evaluate(&roles, &scopes) {
            warn!(
                subject = %claims.sub,
                reason = %violation,
                "Token lacks required permission"
            );
            return Decision::Forbidden(violation);
        }

        debug!(
            subject = %claims.sub,
            roles = roles.len(),
            scopes = scopes.len(),
            "Token authorized"
        );

        Decision::Authorized(Authorization {
            claims,
            roles,
            scopes,
        })
    }
}

/// An [`Authorizer`] bound to one issuer and optional audience
///
/// This is the shape a resource server holds: the expected issuer and
/// audience are fixed at startup, and each protected operation supplies
/// only its policy.
#[derive(Debug, Clone)]
pub struct ProtectedResource {
    authorizer: Authorizer,
    issuer: String,
    audience: Option<String>,
}

impl ProtectedResource {
    /// Bind `authorizer` to an issuer and audience
    pub fn new(authorizer: Authorizer, issuer: impl Into<String>, audience: Option<String>) -> Self {
        Self {
            authorizer,
            issuer: issuer.into(),
            audience: audience.filter(|a| !a.trim().is_empty()),
        }
    }

    /// Expected issuer
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Expected audience
    pub fn audience(&self) -> Option<&str> {
        self.audience.as_deref()
    }

    /// Authorize against the bound issuer and audience
    pub async fn authorize(&self, raw_token: &str, policy: &Policy) -> Decision {
        self.authorizer
            .authorize(raw_token, policy, &self.issuer, self.audience.as_deref())
            .await
    }
}
