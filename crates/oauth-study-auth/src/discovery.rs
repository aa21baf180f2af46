//! OpenID Connect Discovery 1.0
//!
//! Fetches `{issuer}/.well-known/openid-configuration` and keeps the handful
//! of endpoints this crate needs. Also hosts the Keycloak URL conventions,
//! since Keycloak is the provider the bundled configuration targets.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{KeyFetchError, KeyFetchResult};

/// Provider metadata subset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier; must equal the issuer that was queried
    pub issuer: String,
    /// Authorization endpoint (browser redirect target)
    pub authorization_endpoint: String,
    /// Token endpoint (code exchange)
    pub token_endpoint: String,
    /// JSON Web Key Set endpoint
    pub jwks_uri: String,
    /// UserInfo endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    /// RP-initiated logout endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
    /// PKCE methods the provider accepts
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

impl ProviderMetadata {
    /// Whether the provider advertises S256 PKCE
    ///
    /// Providers that omit the field are assumed to support it.
    pub fn supports_s256(&self) -> bool {
        self.code_challenge_methods_supported.is_empty()
            || self
                .code_challenge_methods_supported
                .iter()
                .any(|m| m == "S256")
    }
}

/// Discovery document URL for an issuer
pub fn discovery_url(issuer: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    )
}

/// Fetch and validate the discovery document for `issuer`
///
/// # Errors
///
/// Returns [`KeyFetchError`] if the document is unreachable, not JSON, or
/// names a different issuer.
pub async fn discover(client: &reqwest::Client, issuer: &str) -> KeyFetchResult<ProviderMetadata> {
    let url = discovery_url(issuer);
    ensure_secure_endpoint(&url)?;

    debug!(issuer = issuer, discovery_url = %url, "Fetching OpenID discovery document");

    let response = client.get(&url).send().await.map_err(request_error)?;

    if !response.status().is_success() {
        warn!(issuer = issuer, status = %response.status(), "Discovery endpoint returned error status");
        return Err(KeyFetchError::Status(response.status().as_u16()));
    }

    let metadata: ProviderMetadata = response
        .json()
        .await
        .map_err(|e| KeyFetchError::Discovery(format!("invalid discovery document: {e}")))?;

    if metadata.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
        warn!(
            expected = issuer,
            actual = %metadata.issuer,
            "Discovery document issuer mismatch"
        );
        return Err(KeyFetchError::Discovery(format!(
            "issuer mismatch: expected {issuer}, got {}",
            metadata.issuer
        )));
    }

    Ok(metadata)
}

/// Issuer URL of a Keycloak realm
pub fn keycloak_issuer(base_url: &str, realm: &str) -> String {
    format!("{}/realms/{}", base_url.trim_end_matches('/'), realm)
}

/// JWKS endpoint of a Keycloak realm issuer
pub fn keycloak_jwks_uri(issuer: &str) -> String {
    format!(
        "{}/protocol/openid-connect/certs",
        issuer.trim_end_matches('/')
    )
}

/// Reject plain HTTP unless the host is loopback
///
/// # Errors
///
/// Returns [`KeyFetchError::InvalidEndpoint`] for unparsable URLs, non-HTTP
/// schemes and plain HTTP to remote hosts.
pub fn ensure_secure_endpoint(endpoint: &str) -> KeyFetchResult<()> {
    let url = Url::parse(endpoint)
        .map_err(|e| KeyFetchError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(&url) => Ok(()),
        "http" => Err(KeyFetchError::InvalidEndpoint(format!(
            "{endpoint}: HTTPS required (HTTP only allowed for localhost)"
        ))),
        other => Err(KeyFetchError::InvalidEndpoint(format!(
            "{endpoint}: unsupported scheme {other}"
        ))),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

pub(crate) fn request_error(err: reqwest::Error) -> KeyFetchError {
    if err.is_timeout() {
        KeyFetchError::Timeout
    } else {
        KeyFetchError::Unreachable(err.to_string())
    }
}
