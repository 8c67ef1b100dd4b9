//! Verified token claims.
//!
//! The token payload is decoded once, into [`RawClaims`], where every field
//! is wrapped in [`Lenient`]: a claim of unexpected shape (a numeric `email`,
//! a `roles` entry that is an object) decodes to "absent" instead of failing
//! the whole token. [`TokenClaims`] is the plain, typed view handed to
//! callers.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// A value that decodes to `None` when the JSON shape does not match `T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Lenient<T>(pub(crate) Option<T>);

impl<T> Default for Lenient<T> {
    fn default() -> Self {
        Lenient(None)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Lenient<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Lenient(serde_json::from_value(value).ok()))
    }
}

impl<T> Lenient<T> {
    fn into_option(self) -> Option<T> {
        self.0
    }
}

/// `aud` may be a single string or an array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    Single(String),
    Many(Vec<Lenient<String>>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RoleContainer {
    roles: Lenient<Vec<Lenient<String>>>,
}

impl RoleContainer {
    fn into_roles(self) -> BTreeSet<String> {
        strings(self.roles).into_iter().collect()
    }
}

/// Payload as decoded from the token. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawClaims {
    sub: Lenient<String>,
    email: Lenient<String>,
    preferred_username: Lenient<String>,
    scope: Lenient<String>,
    tenant_id: Lenient<String>,
    groups: Lenient<Vec<Lenient<String>>>,
    realm_access: Lenient<RoleContainer>,
    resource_access: Lenient<HashMap<String, Lenient<RoleContainer>>>,
    iss: Lenient<String>,
    aud: Lenient<Audience>,
    azp: Lenient<String>,
    iat: Lenient<i64>,
    exp: Lenient<i64>,
}

fn strings(list: Lenient<Vec<Lenient<String>>>) -> Vec<String> {
    list.into_option()
        .unwrap_or_default()
        .into_iter()
        .filter_map(Lenient::into_option)
        .collect()
}

fn timestamp(secs: Lenient<i64>) -> Option<DateTime<Utc>> {
    secs.into_option()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Claims of a verified access token.
///
/// Only produced after signature, expiry, issuer and audience checks have
/// passed. `Debug` output redacts the subject and email.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// Subject (`sub`); empty when the token carries none.
    pub subject: String,
    pub email: Option<String>,
    pub preferred_username: Option<String>,
    /// Space-separated scopes.
    pub scope: Option<String>,
    pub tenant_id: Option<String>,
    pub groups: Vec<String>,
    /// Roles from `realm_access.roles`.
    pub realm_roles: BTreeSet<String>,
    /// Roles from `resource_access.<client>.roles`, for every client present.
    pub client_roles: BTreeMap<String, BTreeSet<String>>,
    pub issuer: String,
    pub audience: Vec<String>,
    /// Authorized party (`azp`).
    pub authorized_party: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("subject", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("preferred_username", &self.preferred_username)
            .field("scope", &self.scope)
            .field("tenant_id", &self.tenant_id)
            .field("groups", &self.groups)
            .field("realm_roles", &self.realm_roles)
            .field("client_roles", &self.client_roles)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("authorized_party", &self.authorized_party)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl From<RawClaims> for TokenClaims {
    fn from(raw: RawClaims) -> Self {
        let audience = match raw.aud.into_option() {
            Some(Audience::Single(aud)) => vec![aud],
            Some(Audience::Many(list)) => list.into_iter().filter_map(Lenient::into_option).collect(),
            None => Vec::new(),
        };

        let client_roles = raw
            .resource_access
            .into_option()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(client, container)| {
                container
                    .into_option()
                    .map(|container| (client, container.into_roles()))
            })
            .collect();

        Self {
            subject: raw.sub.into_option().unwrap_or_default(),
            email: raw.email.into_option(),
            preferred_username: raw.preferred_username.into_option(),
            scope: raw.scope.into_option(),
            tenant_id: raw.tenant_id.into_option(),
            groups: strings(raw.groups),
            realm_roles: raw
                .realm_access
                .into_option()
                .map(RoleContainer::into_roles)
                .unwrap_or_default(),
            client_roles,
            issuer: raw.iss.into_option().unwrap_or_default(),
            audience,
            authorized_party: raw.azp.into_option(),
            issued_at: timestamp(raw.iat),
            expires_at: timestamp(raw.exp),
        }
    }
}

impl TokenClaims {
    /// Check if the token has a specific scope.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().any(|s| s == scope)
    }

    /// Iterate over the space-separated scopes.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.as_deref().unwrap_or_default().split_whitespace()
    }

    #[must_use]
    pub fn has_realm_role(&self, role: &str) -> bool {
        self.realm_roles.contains(role)
    }

    /// Whether `client` granted `role` in `resource_access`.
    #[must_use]
    pub fn has_client_role(&self, client: &str, role: &str) -> bool {
        self.client_roles
            .get(client)
            .is_some_and(|roles| roles.contains(role))
    }

    /// Whether `client_id` is named in `aud` or, failing that, is the `azp`.
    #[must_use]
    pub fn is_intended_for(&self, client_id: &str) -> bool {
        self.audience.iter().any(|aud| aud == client_id)
            || self.authorized_party.as_deref() == Some(client_id)
    }
}
