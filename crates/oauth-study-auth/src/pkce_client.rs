//! Authorization Code + PKCE client
//!
//! A public client (no secret) that sends the user to the provider's
//! authorization endpoint with an S256 code challenge and a random CSRF
//! state, then exchanges the returned code together with the verifier.
//!
//! ```rust,no_run
//! use oauth_study_auth::config::ClientSettings;
//! use oauth_study_auth::pkce_client::{AuthCodeClient, ClientEndpoints};
//!
//! # async fn run(callback_url: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let settings = ClientSettings::default();
//! let client = AuthCodeClient::new(&settings, ClientEndpoints::keycloak(&settings.issuer()))?;
//!
//! let pending = client.begin();
//! println!("open {}", pending.url);
//! let tokens = client.complete(pending, callback_url).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthUrl, AuthorizationCode, Client, ClientId, CsrfToken, EndpointNotSet, EndpointSet,
    ExtraTokenFields, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RequestTokenError, Scope,
    StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ClientSettings;
use crate::discovery::{self, ProviderMetadata};
use crate::error::ClientError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenID Connect adds `id_token` to the token response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenFields {
    /// Compact JWS identity token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

type OidcTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

type OidcClient = Client<
    BasicErrorResponse,
    OidcTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// Provider endpoints used by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEndpoints {
    /// Authorization endpoint
    pub authorization_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// RP-initiated logout endpoint
    pub end_session_endpoint: Option<String>,
}

impl ClientEndpoints {
    /// Endpoints at Keycloak's fixed paths below the realm issuer
    pub fn keycloak(issuer: &str) -> Self {
        let base = format!("{}/protocol/openid-connect", issuer.trim_end_matches('/'));
        Self {
            authorization_endpoint: format!("{base}/auth"),
            token_endpoint: format!("{base}/token"),
            end_session_endpoint: Some(format!("{base}/logout")),
        }
    }

    /// Endpoints advertised in a discovery document
    pub fn from_metadata(metadata: &ProviderMetadata) -> Self {
        Self {
            authorization_endpoint: metadata.authorization_endpoint.clone(),
            token_endpoint: metadata.token_endpoint.clone(),
            end_session_endpoint: metadata.end_session_endpoint.clone(),
        }
    }
}

/// An authorization request waiting for its callback
///
/// Holds the secrets needed to finish the flow; keep it in memory only.
#[derive(Debug)]
pub struct PendingAuthorization {
    /// URL to open in the browser
    pub url: Url,
    /// CSRF state sent with the request
    pub state: CsrfToken,
    /// PKCE verifier matching the challenge in `url`
    pub verifier: PkceCodeVerifier,
}

/// Tokens returned by the token endpoint
#[derive(Debug, Clone)]
pub struct TokenSet {
    /// Access token for the resource server
    pub access_token: SecretString,
    /// Refresh token, if issued
    pub refresh_token: Option<SecretString>,
    /// OpenID identity token, if issued
    pub id_token: Option<SecretString>,
    /// Token type (normally `Bearer`)
    pub token_type: String,
    /// Absolute expiry computed from `expires_in`
    pub expires_at: Option<DateTime<Utc>>,
    /// Scopes granted, when the provider reports them
    pub scopes: Vec<String>,
}

impl TokenSet {
    /// Whether the access token has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// Response from a protected API call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    /// HTTP status
    pub status: u16,
    /// JSON body; `{}` when the body is not JSON
    pub body: Value,
}

/// Authorization Code + PKCE public client
#[derive(Debug, Clone)]
pub struct AuthCodeClient {
    oauth: OidcClient,
    http_client: reqwest::Client,
    client_id: String,
    scopes: Vec<String>,
    end_session_endpoint: Option<String>,
}

impl AuthCodeClient {
    /// Client for explicit endpoints
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] if an endpoint or the redirect
    /// URI does not parse, or [`ClientError::Transport`] if the HTTP client
    /// cannot be built.
    pub fn new(settings: &ClientSettings, endpoints: ClientEndpoints) -> Result<Self, ClientError> {
        let auth_url = AuthUrl::new(endpoints.authorization_endpoint)
            .map_err(|e| invalid_url("authorization endpoint", &e))?;
        let token_url = TokenUrl::new(endpoints.token_endpoint)
            .map_err(|e| invalid_url("token endpoint", &e))?;
        let redirect_url = RedirectUrl::new(settings.redirect_uri.clone())
            .map_err(|e| invalid_url("redirect URI", &e))?;

        let oauth: OidcClient = Client::new(ClientId::new(settings.client_id.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url);

        // Following redirects from the token endpoint would leak the code
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            oauth,
            http_client,
            client_id: settings.client_id.clone(),
            scopes: settings.scopes(),
            end_session_endpoint: endpoints.end_session_endpoint,
        })
    }

    /// Client for endpoints found through OpenID discovery
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Discovery`] if discovery fails, plus the
    /// errors of [`AuthCodeClient::new`].
    pub async fn discover(settings: &ClientSettings) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let metadata = discovery::discover(&http_client, &settings.issuer()).await?;
        if !metadata.supports_s256() {
            warn!(issuer = %metadata.issuer, "Provider does not advertise S256 PKCE");
        }

        Self::new(settings, ClientEndpoints::from_metadata(&metadata))
    }

    /// Start a login: authorization URL with S256 challenge and fresh state
    pub fn begin(&self) -> PendingAuthorization {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();

        let (url, state) = self
            .oauth
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .set_pkce_challenge(challenge)
            .url();

        debug!(client_id = %self.client_id, "Authorization request prepared");

        PendingAuthorization {
            url,
            state,
            verifier,
        }
    }

    /// Finish a login from the URL the provider redirected to
    ///
    /// # Errors
    ///
    /// - [`ClientError::Provider`] if the callback or token endpoint carries
    ///   an OAuth error
    /// - [`ClientError::StateMismatch`] if `state` is not the one we sent
    /// - [`ClientError::MissingCode`] if there is no code
    /// - [`ClientError::Transport`] / [`ClientError::InvalidResponse`] for
    ///   token endpoint failures
    pub async fn complete(
        &self,
        pending: PendingAuthorization,
        callback_url: &str,
    ) -> Result<TokenSet, ClientError> {
        let callback = parse_callback(callback_url)?;

        if let Some(error) = callback.error {
            warn!(error = %error, "Provider returned an authorization error");
            return Err(ClientError::Provider {
                error,
                description: callback.error_description,
            });
        }

        if callback.state.as_deref() != Some(pending.state.secret().as_str()) {
            warn!("Authorization callback state mismatch");
            return Err(ClientError::StateMismatch);
        }

        let code = callback.code.ok_or(ClientError::MissingCode)?;

        let response = self
            .oauth
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pending.verifier)
            .request_async(&self.http_client)
            .await
            .map_err(|e| match e {
                RequestTokenError::ServerResponse(resp) => ClientError::Provider {
                    error: resp.error().to_string(),
                    description: resp.error_description().cloned(),
                },
                RequestTokenError::Request(e) => ClientError::Transport(e.to_string()),
                RequestTokenError::Parse(e, _) => ClientError::InvalidResponse(e.to_string()),
                RequestTokenError::Other(message) => ClientError::InvalidResponse(message),
            })?;

        info!(client_id = %self.client_id, "Authorization code exchanged");

        Ok(token_set(&response))
    }

    /// RP-initiated logout URL, if the provider has an end-session endpoint
    pub fn end_session_url(
        &self,
        id_token_hint: Option<&str>,
        post_logout_redirect: Option<&str>,
    ) -> Option<Url> {
        let mut url = Url::parse(self.end_session_endpoint.as_deref()?).ok()?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.client_id);
            if let Some(hint) = id_token_hint {
                query.append_pair("id_token_hint", hint);
            }
            if let Some(redirect) = post_logout_redirect {
                query.append_pair("post_logout_redirect_uri", redirect);
            }
        }

        Some(url)
    }

    /// Call a protected endpoint with the access token
    ///
    /// # Errors
    ///
    /// See [`call_protected_api`].
    pub async fn call_protected_api(
        &self,
        url: &str,
        access_token: &SecretString,
    ) -> Result<ApiResponse, ClientError> {
        call_protected_api(&self.http_client, url, access_token.expose_secret()).await
    }
}

/// `GET url` with `Authorization: Bearer <access_token>`
///
/// Any status is a successful call; the status is reported in the result.
///
/// # Errors
///
/// Returns [`ClientError::Transport`] if the request cannot be sent.
pub async fn call_protected_api(
    client: &reqwest::Client,
    url: &str,
    access_token: &str,
) -> Result<ApiResponse, ClientError> {
    let response = client
        .get(url)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::Object(Default::default()));

    debug!(url = url, status = status, "Protected API called");

    Ok(ApiResponse { status, body })
}

#[derive(Debug, Default)]
struct Callback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

fn parse_callback(callback_url: &str) -> Result<Callback, ClientError> {
    let url = Url::parse(callback_url.trim()).map_err(|e| invalid_url("callback", &e))?;

    let mut callback = Callback::default();
    for (key, value) in url.query_pairs() {
        let slot = match key.as_ref() {
            "code" => &mut callback.code,
            "state" => &mut callback.state,
            "error" => &mut callback.error,
            "error_description" => &mut callback.error_description,
            _ => continue,
        };
        *slot = Some(value.into_owned());
    }

    Ok(callback)
}

fn token_set(response: &OidcTokenResponse) -> TokenSet {
    let expires_at = response
        .expires_in()
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .map(|d| Utc::now() + d);

    TokenSet {
        access_token: SecretString::new(response.access_token().secret().clone()),
        refresh_token: response
            .refresh_token()
            .map(|t| SecretString::new(t.secret().clone())),
        id_token: response
            .extra_fields()
            .id_token
            .clone()
            .map(SecretString::new),
        token_type: response.token_type().as_ref().to_string(),
        expires_at,
        scopes: response
            .scopes()
            .map(|scopes| scopes.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default(),
    }
}

pub(crate) fn invalid_url(name: &'static str, err: &impl std::fmt::Display) -> ClientError {
    ClientError::InvalidUrl {
        name,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AuthCodeClient {
        let settings = ClientSettings::default();
        AuthCodeClient::new(&settings, ClientEndpoints::keycloak(&settings.issuer())).unwrap()
    }

    #[test]
    fn test_keycloak_endpoints() {
        let endpoints = ClientEndpoints::keycloak("http://localhost:8080/realms/demo/");
        assert_eq!(
            endpoints.authorization_endpoint,
            "http://localhost:8080/realms/demo/protocol/openid-connect/auth"
        );
        assert_eq!(
            endpoints.token_endpoint,
            "http://localhost:8080/realms/demo/protocol/openid-connect/token"
        );
    }

    #[test]
    fn test_authorization_url_carries_pkce_and_state() {
        let pending = client().begin();
        let pairs: std::collections::HashMap<_, _> = pending.url.query_pairs().into_owned().collect();

        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "public-pkce-client");
        assert_eq!(pairs["redirect_uri"], "http://localhost:3000/callback");
        assert_eq!(pairs["scope"], "openid profile email service-audit protected-api.read protected-api.write");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(&pairs["state"], pending.state.secret());
        assert!(!pairs["code_challenge"].is_empty());
    }

    #[test]
    fn test_each_login_gets_fresh_state() {
        let client = client();
        assert_ne!(client.begin().state.secret(), client.begin().state.secret());
    }

    #[tokio::test]
    async fn test_state_mismatch_rejected() {
        let client = client();
        let pending = client.begin();

        let err = client
            .complete(pending, "http://localhost:3000/callback?code=abc&state=forged")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::StateMismatch));
        assert_eq!(err.to_string(), "state mismatch");
    }

    #[tokio::test]
    async fn test_provider_error_surfaced() {
        let client = client();
        let pending = client.begin();
        let callback = format!(
            "http://localhost:3000/callback?error=access_denied&error_description=User+cancelled&state={}",
            pending.state.secret()
        );

        let err = client.complete(pending, &callback).await.unwrap_err();
        assert_eq!(err.to_string(), "access_denied: User cancelled");
    }

    #[tokio::test]
    async fn test_missing_code() {
        let client = client();
        let pending = client.begin();
        let callback = format!("http://localhost:3000/callback?state={}", pending.state.secret());

        let err = client.complete(pending, &callback).await.unwrap_err();
        assert!(matches!(err, ClientError::MissingCode));
    }

    #[test]
    fn test_end_session_url() {
        let url = client()
            .end_session_url(Some("id.token.hint"), Some("http://localhost:3000/"))
            .unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert!(url.path().ends_with("/protocol/openid-connect/logout"));
        assert_eq!(pairs["id_token_hint"], "id.token.hint");
        assert_eq!(pairs["post_logout_redirect_uri"], "http://localhost:3000/");
    }

    #[test]
    fn test_invalid_redirect_uri() {
        let settings = ClientSettings {
            redirect_uri: "not a url".into(),
            ..ClientSettings::default()
        };
        let err = AuthCodeClient::new(&settings, ClientEndpoints::keycloak(&settings.issuer()))
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl { name: "redirect URI", .. }));
    }
}
