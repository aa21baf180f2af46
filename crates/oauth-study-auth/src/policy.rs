//! Per-operation access policy

use serde::{Deserialize, Serialize};

use crate::claims::{RoleSet, ScopeSet};
use crate::error::PolicyViolation;

/// Role and scope requirements attached to a protected operation
///
/// Built once at configuration time and shared read-only afterwards.
/// Empty strings are treated as "not configured".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Role that must appear in the token's role set
    #[serde(default)]
    pub required_role: Option<String>,
    /// Scope that must appear in the token's scope set
    #[serde(default)]
    pub required_scope: Option<String>,
}

impl Policy {
    /// Any authenticated token passes
    pub fn none() -> Self {
        Self::default()
    }

    /// Require a role only
    pub fn role(role: impl Into<String>) -> Self {
        Self::none().with_role(role)
    }

    /// Require a scope only
    pub fn scope(scope: impl Into<String>) -> Self {
        Self::none().with_scope(scope)
    }

    /// Set the required role
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.required_role = non_empty(role.into());
        self
    }

    /// Set the required scope
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.required_scope = non_empty(scope.into());
        self
    }

    /// Check the requirements against an authenticated token's sets
    ///
    /// Scope is checked before role, so a caller lacking both learns only
    /// about the scope.
    ///
    /// # Errors
    ///
    /// Returns the first unmet requirement.
    pub fn evaluate(&self, roles: &RoleSet, scopes: &ScopeSet) -> Result<(), PolicyViolation> {
        if let Some(scope) = self.required_scope.as_deref().filter(|s| !s.is_empty())
            && !scopes.contains(scope)
        {
            return Err(PolicyViolation::MissingScope(scope.to_owned()));
        }

        if let Some(role) = self.required_role.as_deref().filter(|r| !r.is_empty())
            && !roles.contains(role)
        {
            return Err(PolicyViolation::MissingRole(role.to_owned()));
        }

        Ok(())
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}
