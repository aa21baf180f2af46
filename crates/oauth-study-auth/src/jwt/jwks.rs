//! JWKS (JSON Web Key Set) resolution and caching
//!
//! - **TTL-based caching**: Default 10 minutes per issuer
//! - **Refresh on unknown key id**: the authorizer forces one refresh when a
//!   token names a `kid` the cached set does not contain
//! - **Rate limiting**: forced refreshes closer together than the minimum
//!   interval are served from cache
//! - **No global lock on the hot path**: the cache lock is never held across
//!   a network fetch. Concurrent misses for one issuer may fetch in parallel;
//!   the last writer wins and every result is a valid key set.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::discovery::{self, ensure_secure_endpoint, request_error};
use crate::error::{KeyFetchError, KeyFetchResult};

/// Current verification keys of one issuer
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: JwkSet,
}

impl KeySet {
    /// Wrap a parsed JWK set
    pub fn new(keys: JwkSet) -> Self {
        Self { keys }
    }

    /// Key with the given `kid`
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.find(kid)
    }

    /// The only key, when the set holds exactly one
    pub fn sole_key(&self) -> Option<&Jwk> {
        match self.keys.keys.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys.keys.len()
    }

    /// No keys
    pub fn is_empty(&self) -> bool {
        self.keys.keys.is_empty()
    }
}

impl Default for KeySet {
    fn default() -> Self {
        Self::new(JwkSet { keys: Vec::new() })
    }
}

impl From<JwkSet> for KeySet {
    fn from(keys: JwkSet) -> Self {
        Self::new(keys)
    }
}

/// Whether a resolver may answer from cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Use a cached set if it is still fresh
    PreferCached,
    /// Re-fetch (subject to the resolver's refresh rate limit)
    ForceRefresh,
}

/// Source of verification keys for an issuer
///
/// Owned by the caller and injected into the
/// [`Authorizer`](crate::Authorizer); tests substitute a scripted fake.
#[async_trait]
pub trait KeyResolver: Send + Sync + fmt::Debug {
    /// Current key set for `issuer`
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError`] if the key endpoint is unreachable or
    /// returns malformed data.
    async fn resolve(&self, issuer: &str, policy: CachePolicy) -> KeyFetchResult<Arc<KeySet>>;
}

/// JWKS cache entry with metadata
#[derive(Debug, Clone)]
struct CachedKeySet {
    keys: Arc<KeySet>,
    fetched_at: Instant,
}

impl CachedKeySet {
    fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// HTTP-backed [`KeyResolver`] with per-issuer caching
///
/// # Example
///
/// ```rust
/// use oauth_study_auth::jwt::JwksResolver;
/// use std::time::Duration;
///
/// let resolver = JwksResolver::new()
///     .with_cache_ttl(Duration::from_secs(300))
///     .with_endpoint(
///         "http://localhost:8080/realms/oauth-study",
///         "http://localhost:8080/realms/oauth-study/protocol/openid-connect/certs",
///     );
/// assert!(resolver.registered_endpoint("http://localhost:8080/realms/oauth-study").is_some());
/// ```
#[derive(Clone)]
pub struct JwksResolver {
    http_client: reqwest::Client,
    /// Issuer -> JWKS endpoint, explicit or discovered
    endpoints: Arc<RwLock<HashMap<String, String>>>,
    /// Issuer -> cached key set
    cache: Arc<RwLock<HashMap<String, CachedKeySet>>>,
    /// Explicit endpoints, immutable after construction
    registered: HashMap<String, String>,
    cache_ttl: Duration,
    min_refresh_interval: Duration,
    fetch_timeout: Duration,
}

impl fmt::Debug for JwksResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwksResolver")
            .field("registered", &self.registered)
            .field("cache_ttl", &self.cache_ttl)
            .field("min_refresh_interval", &self.min_refresh_interval)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for JwksResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl JwksResolver {
    /// Default fetch timeout
    pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default cache TTL
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);
    /// Default minimum spacing between forced refreshes
    pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

    /// Resolver with default settings and no registered endpoints
    ///
    /// Issuers without a registered endpoint are resolved through OpenID
    /// Connect discovery.
    pub fn new() -> Self {
        Self {
            http_client: build_http_client(Self::DEFAULT_FETCH_TIMEOUT),
            endpoints: Arc::new(RwLock::new(HashMap::new())),
            cache: Arc::new(RwLock::new(HashMap::new())),
            registered: HashMap::new(),
            cache_ttl: Self::DEFAULT_CACHE_TTL,
            min_refresh_interval: Self::DEFAULT_MIN_REFRESH_INTERVAL,
            fetch_timeout: Self::DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Register the JWKS endpoint of an issuer (skips discovery)
    pub fn with_endpoint(mut self, issuer: impl Into<String>, jwks_uri: impl Into<String>) -> Self {
        self.registered.insert(issuer.into(), jwks_uri.into());
        self
    }

    /// Cache time-to-live
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Minimum spacing between forced refreshes of one issuer
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Bound on every HTTP request the resolver makes
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self.http_client = build_http_client(timeout);
        self
    }

    /// Explicitly registered JWKS endpoint for `issuer`
    pub fn registered_endpoint(&self, issuer: &str) -> Option<&str> {
        self.registered.get(issuer).map(String::as_str)
    }

    /// Configured cache TTL
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Drop every cached key set (discovered endpoints are kept)
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
        debug!("JWKS cache cleared");
    }

    async fn cached(&self, issuer: &str) -> Option<CachedKeySet> {
        self.cache.read().await.get(issuer).cloned()
    }

    async fn endpoint_for(&self, issuer: &str) -> KeyFetchResult<String> {
        if let Some(uri) = self.registered.get(issuer) {
            return Ok(uri.clone());
        }

        if let Some(uri) = self.endpoints.read().await.get(issuer) {
            return Ok(uri.clone());
        }

        let metadata = discovery::discover(&self.http_client, issuer).await?;
        info!(issuer = issuer, jwks_uri = %metadata.jwks_uri, "Discovered JWKS endpoint");

        self.endpoints
            .write()
            .await
            .insert(issuer.to_owned(), metadata.jwks_uri.clone());

        Ok(metadata.jwks_uri)
    }

    async fn fetch_and_cache(&self, issuer: &str) -> KeyFetchResult<Arc<KeySet>> {
        let jwks_uri = self.endpoint_for(issuer).await?;
        ensure_secure_endpoint(&jwks_uri)?;

        info!(issuer = issuer, jwks_uri = %jwks_uri, "Fetching JWKS from endpoint");

        let response = self
            .http_client
            .get(&jwks_uri)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(|e| {
                error!(jwks_uri = %jwks_uri, error = %e, "Failed to fetch JWKS");
                request_error(e)
            })?;

        if !response.status().is_success() {
            error!(
                jwks_uri = %jwks_uri,
                status = %response.status(),
                "JWKS endpoint returned error status"
            );
            return Err(KeyFetchError::Status(response.status().as_u16()));
        }

        let body = response.bytes().await.map_err(|e| {
            error!(jwks_uri = %jwks_uri, error = %e, "Failed to read JWKS body");
            request_error(e)
        })?;

        let jwks: JwkSet = serde_json::from_slice(&body).map_err(|e| {
            error!(jwks_uri = %jwks_uri, error = %e, "Failed to parse JWKS JSON");
            KeyFetchError::Malformed(e.to_string())
        })?;

        info!(
            jwks_uri = %jwks_uri,
            key_count = jwks.keys.len(),
            "Successfully fetched JWKS"
        );

        let keys = Arc::new(KeySet::new(jwks));
        self.cache.write().await.insert(
            issuer.to_owned(),
            CachedKeySet {
                keys: Arc::clone(&keys),
                fetched_at: Instant::now(),
            },
        );

        Ok(keys)
    }
}

#[async_trait]
impl KeyResolver for JwksResolver {
    async fn resolve(&self, issuer: &str, policy: CachePolicy) -> KeyFetchResult<Arc<KeySet>> {
        if let Some(cached) = self.cached(issuer).await {
            match policy {
                CachePolicy::PreferCached if cached.age() < self.cache_ttl => {
                    debug!(issuer = issuer, "Using cached JWKS");
                    return Ok(cached.keys);
                }
                CachePolicy::ForceRefresh if cached.age() < self.min_refresh_interval => {
                    warn!(
                        issuer = issuer,
                        since_last_ms = cached.age().as_millis(),
                        "JWKS refresh rate limited, using cache"
                    );
                    return Ok(cached.keys);
                }
                _ => {}
            }
        }

        self.fetch_and_cache(issuer).await
    }
}

fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            // Only fails if the TLS backend cannot initialize
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}
