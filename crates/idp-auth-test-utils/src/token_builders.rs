//! Builder patterns for test claim construction
//!
//! Provides a fluent API for Keycloak-shaped access token claims.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

use crate::test_ids::{TEST_CLIENT_ID, TEST_SUBJECT};

/// Builder for creating test JWT claims
///
/// # Example
/// ```rust,ignore
/// let claims = TestTokenBuilder::new()
///     .issued_by("https://idp.test/realms/acme")
///     .for_audience(&["svc"])
///     .with_realm_roles(&["admin"])
///     .expires_in(3600)
///     .build();
/// ```
pub struct TestTokenBuilder {
    claims: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Create a new builder: one hour lifetime, audience = test client.
    pub fn new() -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("sub".into(), json!(TEST_SUBJECT));
        claims.insert("aud".into(), json!([TEST_CLIENT_ID]));
        claims.insert("iat".into(), json!(now.timestamp()));
        claims.insert(
            "exp".into(),
            json!((now + Duration::seconds(3600)).timestamp()),
        );
        Self { claims }
    }

    /// Set the subject
    pub fn for_user(self, subject: &str) -> Self {
        self.with_claim("sub", json!(subject))
    }

    /// Set the issuer
    pub fn issued_by(self, issuer: &str) -> Self {
        self.with_claim("iss", json!(issuer))
    }

    /// Set the audience list
    pub fn for_audience(self, audience: &[&str]) -> Self {
        self.with_claim("aud", json!(audience))
    }

    /// Remove the audience claim entirely
    pub fn without_audience(mut self) -> Self {
        self.claims.remove("aud");
        self
    }

    /// Set the authorized party (`azp`)
    pub fn authorized_party(self, azp: &str) -> Self {
        self.with_claim("azp", json!(azp))
    }

    /// Set expiration in seconds from now (negative for already expired)
    pub fn expires_in(self, seconds: i64) -> Self {
        let exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self.with_claim("exp", json!(exp))
    }

    /// Set `nbf` in seconds from now
    pub fn not_before_in(self, seconds: i64) -> Self {
        let nbf = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self.with_claim("nbf", json!(nbf))
    }

    /// Set the scope (space-separated)
    pub fn with_scope(self, scope: &str) -> Self {
        self.with_claim("scope", json!(scope))
    }

    /// Set email and preferred username
    pub fn with_identity(self, email: &str, username: &str) -> Self {
        self.with_claim("email", json!(email))
            .with_claim("preferred_username", json!(username))
    }

    /// Set the tenant id claim
    pub fn with_tenant(self, tenant_id: &str) -> Self {
        self.with_claim("tenant_id", json!(tenant_id))
    }

    /// Set group memberships
    pub fn with_groups(self, groups: &[&str]) -> Self {
        self.with_claim("groups", json!(groups))
    }

    /// Set realm-level roles (`realm_access.roles`)
    pub fn with_realm_roles(self, roles: &[&str]) -> Self {
        self.with_claim("realm_access", json!({ "roles": roles }))
    }

    /// Add per-client roles (`resource_access.<client>.roles`)
    pub fn with_client_roles(mut self, client_id: &str, roles: &[&str]) -> Self {
        let entry = self
            .claims
            .entry("resource_access")
            .or_insert_with(|| json!({}));
        if let Some(map) = entry.as_object_mut() {
            map.insert(client_id.to_string(), json!({ "roles": roles }));
        }
        self
    }

    /// Set an arbitrary claim (used for malformed-shape scenarios)
    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Remove a claim
    pub fn without_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let claims = TestTokenBuilder::default().build();

        assert_eq!(claims["sub"], TEST_SUBJECT);
        assert_eq!(claims["aud"], json!([TEST_CLIENT_ID]));
        assert!(claims["exp"].as_i64().unwrap() > Utc::now().timestamp());
        assert!(claims.get("iss").is_none());
    }

    #[test]
    fn test_builder_client_roles_accumulate() {
        let claims = TestTokenBuilder::new()
            .with_client_roles("svc", &["reader"])
            .with_client_roles("billing", &["invoice:write"])
            .build();

        assert_eq!(claims["resource_access"]["svc"]["roles"], json!(["reader"]));
        assert_eq!(
            claims["resource_access"]["billing"]["roles"],
            json!(["invoice:write"])
        );
    }

    #[test]
    fn test_builder_expired() {
        let claims = TestTokenBuilder::new().expires_in(-1).build();
        assert!(claims["exp"].as_i64().unwrap() < Utc::now().timestamp());
    }
}
