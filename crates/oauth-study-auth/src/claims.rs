//! Verified token claims and role/scope extraction
//!
//! Identity providers disagree on where permissions live. Keycloak puts
//! realm roles under `realm_access.roles` and client roles under
//! `resource_access.<client>.roles`; other providers emit a flat `roles`
//! array. Scopes arrive either as an OAuth-style space-delimited `scope`
//! string or as a `scopes` array. Extraction follows a fixed precedence:
//!
//! - roles: union of `roles`, `realm_access.roles` and every
//!   `resource_access.*.roles`, deduplicated
//! - scopes: `scopes` when present (even if empty), else `scope` split on
//!   whitespace, else empty

use std::collections::{BTreeMap, BTreeSet, HashMap};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MalformedTokenError;

/// The `aud` claim, which may be a single string or an array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "api"`
    Single(String),
    /// `"aud": ["api", "account"]`
    Many(Vec<String>),
}

impl Audience {
    /// Whether `audience` is one of the listed recipients
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Self::Single(aud) => aud == audience,
            Self::Many(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

/// A `{ "roles": [...] }` container as used by `realm_access` and each
/// `resource_access` entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleContainer {
    /// Role names
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Claims decoded from a verified access token
///
/// `sub`, `iss` and `exp` default only so that their absence is reported
/// by the verifier as a missing claim rather than a shape error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub) - the principal
    #[serde(default)]
    pub sub: String,

    /// Issuer (iss)
    #[serde(default)]
    pub iss: String,

    /// Expiration Time (exp) - Unix timestamp
    #[serde(default, deserialize_with = "numeric_date::required")]
    pub exp: u64,

    /// Issued At (iat) - Unix timestamp
    #[serde(
        default,
        deserialize_with = "numeric_date::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<u64>,

    /// Not Before (nbf) - Unix timestamp
    #[serde(
        default,
        deserialize_with = "numeric_date::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<u64>,

    /// Audience (aud)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,

    /// Space-delimited OAuth scope string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Scope array (takes precedence over `scope`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,

    /// Flat role array
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,

    /// Realm-wide roles (Keycloak)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm_access: Option<RoleContainer>,

    /// Per-client roles keyed by client id (Keycloak)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_access: Option<BTreeMap<String, RoleContainer>>,

    /// Every other claim
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

impl Claims {
    /// Union of all role sources
    pub fn role_set(&self) -> RoleSet {
        let flat = self.roles.iter().flatten();
        let realm = self.realm_access.iter().flat_map(|c| c.roles.iter());
        let resource = self
            .resource_access
            .iter()
            .flat_map(|clients| clients.values())
            .flat_map(|c| c.roles.iter());

        flat.chain(realm).chain(resource).cloned().collect()
    }

    /// Scopes granted to the token
    pub fn scope_set(&self) -> ScopeSet {
        match (&self.scopes, &self.scope) {
            (Some(scopes), _) => scopes.iter().cloned().collect(),
            (None, Some(scope)) => scope.split_whitespace().map(str::to_owned).collect(),
            (None, None) => ScopeSet::default(),
        }
    }

    /// `iat` as a timestamp
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat.and_then(timestamp)
    }

    /// `exp` as a timestamp
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        timestamp(self.exp)
    }
}

fn timestamp(secs: u64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::try_from(secs).ok()?, 0)
}

/// RFC 7519 NumericDate: integer or fractional seconds, rounded to whole
/// seconds the same way the signature verifier reads them
mod numeric_date {
    use std::fmt;

    use serde::Deserialize as _;
    use serde::de::{self, Deserializer, Visitor};

    struct NumericDate;

    impl Visitor<'_> for NumericDate {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative NumericDate")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
            u64::try_from(value).map_err(|_| E::invalid_value(de::Unexpected::Signed(value), &self))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<u64, E> {
            if value.is_finite() && value >= 0.0 && value < u64::MAX as f64 {
                Ok(value.round() as u64)
            } else {
                Err(E::invalid_value(de::Unexpected::Float(value), &self))
            }
        }
    }

    pub(super) fn required<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        deserializer.deserialize_any(NumericDate)
    }

    pub(super) fn optional<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u64>, D::Error> {
        struct Wrapped(u64);

        impl<'de> serde::Deserialize<'de> for Wrapped {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                required(deserializer).map(Wrapped)
            }
        }

        Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(secs)| secs))
    }
}

macro_rules! string_set {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(BTreeSet<String>);

        impl $name {
            /// Membership test
            pub fn contains(&self, name: &str) -> bool {
                self.0.contains(name)
            }

            /// Iterate in sorted order
            pub fn iter(&self) -> impl Iterator<Item = &str> {
                self.0.iter().map(String::as_str)
            }

            /// Number of distinct entries
            pub fn len(&self) -> usize {
                self.0.len()
            }

            /// No entries
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl FromIterator<String> for $name {
            fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
                Self(iter.into_iter().collect())
            }
        }

        impl<'a> FromIterator<&'a str> for $name {
            fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
                Self(iter.into_iter().map(str::to_owned).collect())
            }
        }

        impl IntoIterator for $name {
            type Item = String;
            type IntoIter = std::collections::btree_set::IntoIter<String>;

            fn into_iter(self) -> Self::IntoIter {
                self.0.into_iter()
            }
        }
    };
}

string_set!(
    /// Deduplicated role names, order-irrelevant (stored sorted)
    RoleSet
);

string_set!(
    /// Deduplicated scope names, order-irrelevant (stored sorted)
    ScopeSet
);

/// Decode a compact token's payload WITHOUT verifying it
///
/// Display only. Nothing returned here may feed an authorization decision.
///
/// # Errors
///
/// Returns [`MalformedTokenError`] if the token does not have three
/// segments or the payload is not base64url-encoded JSON.
pub fn decode_unverified(token: &str) -> Result<serde_json::Value, MalformedTokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(MalformedTokenError::SegmentCount {
            found: segments.len(),
        });
    }

    let payload = URL_SAFE_NO_PAD
        .decode(segments[1])
        .map_err(|e| MalformedTokenError::Payload(e.to_string()))?;

    serde_json::from_slice(&payload).map_err(|e| MalformedTokenError::Payload(e.to_string()))
}
