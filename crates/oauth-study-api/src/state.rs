//! Shared application state

use oauth_study_auth::config::ResourceServerConfig;
use oauth_study_auth::{Policy, ProtectedResource};

/// Everything a request handler needs, built once at startup
#[derive(Debug, Clone)]
pub struct AppState {
    /// Authorizer bound to the configured issuer and audience
    pub resource: ProtectedResource,
    /// Policy guarding read routes
    pub read_policy: Policy,
    /// Policy guarding write routes
    pub write_policy: Policy,
}

impl AppState {
    /// State for an explicitly built resource
    pub fn new(resource: ProtectedResource, read_policy: Policy, write_policy: Policy) -> Self {
        Self {
            resource,
            read_policy,
            write_policy,
        }
    }

    /// State from loaded configuration
    pub fn from_config(config: &ResourceServerConfig) -> Self {
        Self::new(
            config.build_protected_resource(),
            config.read_policy(),
            config.write_policy(),
        )
    }
}
