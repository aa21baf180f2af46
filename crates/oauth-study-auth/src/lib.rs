//! # OAuth Study Auth
//!
//! Bearer token authorization for a resource server that trusts an external
//! OpenID Connect provider, plus the Authorization Code + PKCE client used
//! to obtain tokens.
//!
//! ## Architecture
//!
//! - [`authorizer`] - `authorize(token, policy, issuer, audience) -> Decision`
//! - [`jwt`] - key resolution (JWKS cache with forced refresh) and verification
//! - [`claims`] - claim model, role and scope extraction
//! - [`policy`] - required role and scope, scope checked first
//! - [`decision`] - `Authorized` / `Unauthenticated` / `Forbidden`
//! - [`error`] - error taxonomy; nothing escapes the authorizer as `Err`
//! - [`discovery`] - OpenID discovery and Keycloak endpoint conventions
//! - [`config`] - layered settings (defaults, file, environment)
//! - [`server`] - bearer header parsing and `WWW-Authenticate` challenges
//! - [`pkce_client`] - Authorization Code + PKCE public client
//! - [`form_login`] - headless credential login standing in for the browser
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use oauth_study_auth::config::ResourceServerConfig;
//! use oauth_study_auth::Decision;
//!
//! # async fn run(token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ResourceServerConfig::load(None)?;
//! let resource = config.build_protected_resource();
//!
//! match resource.authorize(token, &config.read_policy()).await {
//!     Decision::Authorized(auth) => println!("hello {}", auth.subject()),
//!     rejected => println!("{:?}: {:?}", rejected.status_code(), rejected.reason()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Security
//!
//! - Signature is verified before any claim is read
//! - Only asymmetric algorithms are accepted; `none` and HMAC are rejected
//! - Key resolver faults, panics and timeouts fail closed
//! - Tokens are never logged

#![warn(missing_docs)]

pub mod authorizer;
pub mod claims;
pub mod config;
pub mod decision;
pub mod discovery;
pub mod error;
pub mod form_login;
pub mod jwt;
pub mod pkce_client;
pub mod policy;
pub mod server;

pub use authorizer::{Authorizer, ProtectedResource};
pub use claims::{Audience, Claims, RoleSet, ScopeSet};
pub use decision::{Authorization, Decision};
pub use error::{
    AuthError, ClaimValidationError, ClientError, ConfigError, KeyFetchError, KeyFetchResult,
    MalformedTokenError, PolicyViolation, SignatureError,
};
pub use jwt::{CachePolicy, JwksResolver, KeyResolver, KeySet};
pub use policy::Policy;
