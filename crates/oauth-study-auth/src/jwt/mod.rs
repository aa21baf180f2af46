//! JWT infrastructure: key resolution and signature/claim verification
//!
//! ```text
//! ┌──────────────────────────────┐
//! │          Authorizer          │  policy (scope, role) -> Decision
//! └──────────────┬───────────────┘
//!                │
//! ┌──────────────▼───────────────┐
//! │        TokenVerifier         │  structure, alg, signature,
//! │                              │  iss/aud/exp/nbf/iat
//! └──────────────┬───────────────┘
//!                │ one forced refresh on unknown kid
//! ┌──────────────▼───────────────┐
//! │   KeyResolver (JwksResolver) │  per-issuer TTL cache
//! └──────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `jwks` - key set resolution and caching
//! - `verifier` - signature and registered-claim verification

pub mod jwks;
pub mod verifier;

pub use jwks::{CachePolicy, JwksResolver, KeyResolver, KeySet};
pub use verifier::{TokenVerifier, VerificationSettings};
