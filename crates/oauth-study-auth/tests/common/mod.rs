//! Common test utilities for integration tests
//!
//! RSA signing fixtures, token minting, a scripted in-memory key resolver
//! and a wiremock identity provider.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use oauth_study_auth::{CachePolicy, KeyFetchError, KeyFetchResult, KeyResolver, KeySet};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const ISSUER: &str = "https://idp.example.com/realms/oauth-study";
pub const AUDIENCE: &str = "protected-api";

pub const PRIMARY_KID: &str = "primary-2025";
pub const ROTATED_KID: &str = "rotated-2025";

const PRIMARY_PEM: &[u8] = include_bytes!("../fixtures/primary.pem");
const ROTATED_PEM: &[u8] = include_bytes!("../fixtures/rotated.pem");

const PRIMARY_N: &str = "20F4ltCF7H34cSGVvZNO3DZ4y8NWppbI_WVQ7AFCiTpoI0mqcdUluZSZA0V2IQaPmMABIXkkjG3sD9J-Of-gZ8Y3clKeuZ0IijlUerC4qPqZ-7jNKOdu3-rlK86m9gy73G3_VfO6j80rfaF4BfUCdZqbMQudmaen5gKu4SejwzR3MRocJNS8Xxm2XlUdOeEUecl1_nBav1LpllimwCdIZVH0fRVBwUFf5lawel3wz3PVPnglvoK_qgnmVa4ycJMN77UbE8XHjPegT_Ge_X-OL4fa4fJWMypYjjBy6yYZ--BeXTVy03Hgfty0tCTMCEzxLTOE7_kvQEaSbBQOR9W2OQ";
const ROTATED_N: &str = "miqeWtcr8G-vHumsuAbpxVWeFjiM4QNbrPgXD4wS64a2vX0ke4VUli2BfcozF3xoLOwucOc12zP7iZ3ttQ74CnJfLaaB3JbrX9qGSx5245sz4GwTklFRxPY4SyNq0L0t2QnuMtn93yyCW1zXHjAdjDQUaqd1TrOdtwCVRhG0XCx2HkrDUTXT9MqslkxiMPqNh1SPvTOr3lhgqGRxlgJKalvFAbvElJtLfD0pMrQ3U8OgdOvfj-uLzYAGiT6KRSVmXSK0K855JuUN2dePNG_YSHykrLL8XE_HdcINdAc2nKHQO58QMGZ6VhKXQuhQjBMNGR0xLa8oRx7B5ecE_CCMTw";

/// One of the two fixture signing keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningKey {
    Primary,
    Rotated,
}

impl SigningKey {
    pub fn kid(self) -> &'static str {
        match self {
            Self::Primary => PRIMARY_KID,
            Self::Rotated => ROTATED_KID,
        }
    }

    pub fn encoding_key(self) -> EncodingKey {
        let pem = match self {
            Self::Primary => PRIMARY_PEM,
            Self::Rotated => ROTATED_PEM,
        };
        EncodingKey::from_rsa_pem(pem).expect("fixture key is valid PEM")
    }

    /// Public JWK for this key
    pub fn jwk(self) -> Value {
        let n = match self {
            Self::Primary => PRIMARY_N,
            Self::Rotated => ROTATED_N,
        };
        json!({
            "kty": "RSA",
            "kid": self.kid(),
            "use": "sig",
            "alg": "RS256",
            "n": n,
            "e": "AQAB"
        })
    }
}

/// JWKS document holding `keys`
pub fn jwks(keys: &[SigningKey]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>() })
}

/// Parsed key set holding `keys`
pub fn key_set(keys: &[SigningKey]) -> Arc<KeySet> {
    let set: JwkSet = serde_json::from_value(jwks(keys)).expect("fixture JWKS parses");
    Arc::new(KeySet::from(set))
}

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs()
}

/// Claims of a valid token for `ISSUER` and `AUDIENCE`, valid for five minutes
pub fn base_claims() -> Value {
    let now = now();
    json!({
        "sub": "user-123",
        "iss": ISSUER,
        "aud": AUDIENCE,
        "iat": now,
        "exp": now + 300,
        "scope": "openid profile",
    })
}

/// Claims granting `roles` (as realm roles) and `scope`
pub fn claims_with(roles: &[&str], scope: &str) -> Value {
    let mut claims = base_claims();
    claims["realm_access"] = json!({ "roles": roles });
    claims["scope"] = json!(scope);
    claims
}

/// Sign `claims` with RS256 and the given key id
pub fn mint_with_kid(claims: &Value, key: SigningKey, kid: Option<&str>) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_owned);
    jsonwebtoken::encode(&header, claims, &key.encoding_key()).expect("token encodes")
}

/// Sign `claims` with `key`, naming its own key id
pub fn mint(claims: &Value, key: SigningKey) -> String {
    mint_with_kid(claims, key, Some(key.kid()))
}

/// What [`ScriptedResolver`] does on each call
#[derive(Debug, Clone)]
pub enum Step {
    Keys(Arc<KeySet>),
    Fail(KeyFetchError),
    Panic,
    Hang,
}

/// In-memory resolver replaying a script and counting calls
///
/// The last step repeats once the script is exhausted.
#[derive(Debug)]
pub struct ScriptedResolver {
    steps: Vec<Step>,
    calls: AtomicUsize,
    policies: Mutex<Vec<CachePolicy>>,
}

impl ScriptedResolver {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        assert!(!steps.is_empty(), "script needs at least one step");
        Arc::new(Self {
            steps,
            calls: AtomicUsize::new(0),
            policies: Mutex::new(Vec::new()),
        })
    }

    /// Always answers with `keys`
    pub fn serving(keys: &[SigningKey]) -> Arc<Self> {
        Self::new(vec![Step::Keys(key_set(keys))])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn policies(&self) -> Vec<CachePolicy> {
        self.policies.lock().expect("lock").clone()
    }
}

#[async_trait]
impl KeyResolver for ScriptedResolver {
    async fn resolve(&self, _issuer: &str, policy: CachePolicy) -> KeyFetchResult<Arc<KeySet>> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.policies.lock().expect("lock").push(policy);

        match &self.steps[index.min(self.steps.len() - 1)] {
            Step::Keys(keys) => Ok(Arc::clone(keys)),
            Step::Fail(err) => Err(err.clone()),
            Step::Panic => panic!("scripted resolver panic"),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(KeyFetchError::Timeout)
            }
        }
    }
}

pub const JWKS_PATH: &str = "/realms/oauth-study/protocol/openid-connect/certs";
pub const DISCOVERY_PATH: &str = "/realms/oauth-study/.well-known/openid-configuration";
pub const TOKEN_PATH: &str = "/realms/oauth-study/protocol/openid-connect/token";

/// Mock identity provider serving one realm
pub struct MockIdentityProvider {
    pub server: MockServer,
}

impl MockIdentityProvider {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Realm issuer on the mock server
    pub fn issuer(&self) -> String {
        format!("{}/realms/oauth-study", self.server.uri())
    }

    pub fn jwks_uri(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Serve `keys` from the JWKS endpoint
    pub async fn mock_jwks(&self, keys: &[SigningKey]) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks(keys)))
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` for at most `times` requests
    pub async fn mock_jwks_times(&self, keys: &[SigningKey], times: u64) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks(keys)))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Answer the JWKS endpoint with an arbitrary response
    pub async fn mock_jwks_response(&self, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Serve a discovery document for the realm
    pub async fn mock_discovery(&self) {
        let issuer = self.issuer();
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": issuer,
                "authorization_endpoint": format!("{issuer}/protocol/openid-connect/auth"),
                "token_endpoint": format!("{issuer}/protocol/openid-connect/token"),
                "jwks_uri": self.jwks_uri(),
                "end_session_endpoint": format!("{issuer}/protocol/openid-connect/logout"),
                "code_challenge_methods_supported": ["plain", "S256"],
            })))
            .mount(&self.server)
            .await;
    }

    /// Number of requests the JWKS endpoint received
    pub async fn jwks_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == JWKS_PATH)
            .count()
    }
}
