//! Configuration
//!
//! Settings are layered: built-in defaults, then an optional file (TOML,
//! YAML or JSON, chosen by extension), then environment variables. The
//! environment keys are the plain upper-case field names (`KEYCLOAK_URL`,
//! `REALM`, `AUDIENCE`, ...), so an existing `.env` for the identity
//! provider setup works unchanged. Empty values mean "unset".

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::authorizer::{Authorizer, ProtectedResource};
use crate::discovery::{keycloak_issuer, keycloak_jwks_uri};
use crate::error::ConfigError;
use crate::jwt::JwksResolver;
use crate::policy::Policy;

fn default_keycloak_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_realm() -> String {
    "oauth-study".to_string()
}

fn default_required_role() -> Option<String> {
    Some("service.reader".to_string())
}

fn default_read_scope() -> Option<String> {
    Some("protected-api.read".to_string())
}

fn default_writer_role() -> Option<String> {
    Some("service.writer".to_string())
}

fn default_write_scope() -> Option<String> {
    Some("protected-api.write".to_string())
}

fn default_clock_skew_secs() -> u64 {
    5
}

fn default_jwks_cache_ttl_secs() -> u64 {
    600
}

fn default_jwks_timeout_secs() -> u64 {
    10
}

fn default_port() -> u16 {
    4000
}

/// Resource server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceServerConfig {
    /// Identity provider base URL
    #[serde(default = "default_keycloak_url")]
    pub keycloak_url: String,
    /// Realm (tenant) name
    #[serde(default = "default_realm")]
    pub realm: String,
    /// Expected `aud`; unset disables the audience check
    #[serde(default)]
    pub audience: Option<String>,
    /// Role required by read operations
    #[serde(default = "default_required_role")]
    pub required_role: Option<String>,
    /// Scope required by read operations
    #[serde(default = "default_read_scope")]
    pub read_scope: Option<String>,
    /// Role required by write operations
    #[serde(default = "default_writer_role")]
    pub writer_role: Option<String>,
    /// Scope required by write operations
    #[serde(default = "default_write_scope")]
    pub write_scope: Option<String>,
    /// Explicit JWKS endpoint; derived from the issuer when unset
    #[serde(default)]
    pub jwks_uri: Option<String>,
    /// Clock-skew tolerance in seconds
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,
    /// JWKS cache TTL in seconds
    #[serde(default = "default_jwks_cache_ttl_secs")]
    pub jwks_cache_ttl_secs: u64,
    /// Bound on key fetches in seconds
    #[serde(default = "default_jwks_timeout_secs")]
    pub jwks_timeout_secs: u64,
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ResourceServerConfig {
    fn default() -> Self {
        Self {
            keycloak_url: default_keycloak_url(),
            realm: default_realm(),
            audience: None,
            required_role: default_required_role(),
            read_scope: default_read_scope(),
            writer_role: default_writer_role(),
            write_scope: default_write_scope(),
            jwks_uri: None,
            clock_skew_secs: default_clock_skew_secs(),
            jwks_cache_ttl_secs: default_jwks_cache_ttl_secs(),
            jwks_timeout_secs: default_jwks_timeout_secs(),
            port: default_port(),
        }
    }
}

impl ResourceServerConfig {
    /// Load from defaults, an optional file and the process environment
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is missing or has an unknown
    /// extension, or a value fails to parse.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, Environment::default().try_parsing(true))
    }

    /// Load with a caller-supplied environment source
    ///
    /// # Errors
    ///
    /// See [`ResourceServerConfig::load`].
    pub fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let config: Self = load_layered(path, env)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.keycloak_url).map_err(|e| ConfigError::Invalid {
            key: "KEYCLOAK_URL",
            message: e.to_string(),
        })?;

        if self.realm.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "REALM",
                message: "must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Expected issuer (`{KEYCLOAK_URL}/realms/{REALM}`)
    pub fn issuer(&self) -> String {
        keycloak_issuer(&self.keycloak_url, &self.realm)
    }

    /// JWKS endpoint for the issuer
    pub fn jwks_uri(&self) -> String {
        non_empty(self.jwks_uri.as_deref())
            .map(str::to_owned)
            .unwrap_or_else(|| keycloak_jwks_uri(&self.issuer()))
    }

    /// Expected audience, if configured
    pub fn audience(&self) -> Option<String> {
        non_empty(self.audience.as_deref()).map(str::to_owned)
    }

    /// Policy for read operations
    pub fn read_policy(&self) -> Policy {
        policy(self.required_role.as_deref(), self.read_scope.as_deref())
    }

    /// Policy for write operations
    pub fn write_policy(&self) -> Policy {
        policy(self.writer_role.as_deref(), self.write_scope.as_deref())
    }

    /// Clock-skew tolerance
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }

    /// Key resolver for the configured issuer
    pub fn build_resolver(&self) -> JwksResolver {
        JwksResolver::new()
            .with_endpoint(self.issuer(), self.jwks_uri())
            .with_cache_ttl(Duration::from_secs(self.jwks_cache_ttl_secs))
            .with_fetch_timeout(Duration::from_secs(self.jwks_timeout_secs))
    }

    /// Authorizer bound to the configured issuer and audience
    pub fn build_protected_resource(&self) -> ProtectedResource {
        let authorizer = Authorizer::new(Arc::new(self.build_resolver()))
            .with_clock_skew(self.clock_skew())
            .with_resolve_timeout(Duration::from_secs(self.jwks_timeout_secs));

        ProtectedResource::new(authorizer, self.issuer(), self.audience())
    }
}

fn default_client_id() -> String {
    "public-pkce-client".to_string()
}

fn default_redirect_uri() -> String {
    "http://localhost:3000/callback".to_string()
}

fn default_scope() -> String {
    "openid profile email service-audit protected-api.read protected-api.write".to_string()
}

fn default_protected_api_url() -> String {
    "http://localhost:4000/api/hello".to_string()
}

/// Headless client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Identity provider base URL
    #[serde(default = "default_keycloak_url")]
    pub keycloak_url: String,
    /// Realm (tenant) name
    #[serde(default = "default_realm")]
    pub realm: String,
    /// Public client id registered at the provider
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Redirect URI registered for the client
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    /// Space-delimited scopes to request
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Protected endpoint to call with the access token
    #[serde(default = "default_protected_api_url")]
    pub protected_api_url: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            keycloak_url: default_keycloak_url(),
            realm: default_realm(),
            client_id: default_client_id(),
            redirect_uri: default_redirect_uri(),
            scope: default_scope(),
            protected_api_url: default_protected_api_url(),
        }
    }
}

impl ClientSettings {
    /// Load from defaults, an optional file and the process environment
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is missing or has an unknown
    /// extension, or a value fails to parse.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, Environment::default())
    }

    /// Load with a caller-supplied environment source
    ///
    /// # Errors
    ///
    /// See [`ClientSettings::load`].
    pub fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        load_layered(path, env)
    }

    /// Issuer of the configured realm
    pub fn issuer(&self) -> String {
        keycloak_issuer(&self.keycloak_url, &self.realm)
    }

    /// Requested scopes as a list
    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(str::to_owned).collect()
    }
}

fn load_layered<T: DeserializeOwned>(path: Option<&Path>, env: Environment) -> Result<T, ConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        builder = builder.add_source(File::from(path).format(format));
    }

    // Environment variables override file settings (12-factor app pattern)
    let config = builder.add_source(env).build()?;
    Ok(config.try_deserialize()?)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn policy(role: Option<&str>, scope: Option<&str>) -> Policy {
    let mut policy = Policy::none();
    if let Some(role) = non_empty(role) {
        policy = policy.with_role(role);
    }
    if let Some(scope) = non_empty(scope) {
        policy = policy.with_scope(scope);
    }
    policy
}
