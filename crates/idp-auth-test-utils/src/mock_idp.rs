//! Mock identity provider harness
//!
//! Wraps a `wiremock::MockServer` and knows the Keycloak-style realm paths,
//! so tests can mount JWKS, token and discovery responses without repeating
//! URL construction.

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::crypto_fixtures::TestSigningKey;

/// A running mock identity provider for one realm.
///
/// # Example
/// ```rust,ignore
/// let idp = MockIdp::start("acme").await;
/// idp.mount_jwks(&[&key]).await;
/// let config = AuthProviderConfig::new(idp.base_url(), "acme", "svc", secret);
/// ```
pub struct MockIdp {
    server: MockServer,
    realm: String,
}

impl MockIdp {
    /// Start a mock server serving `realm`.
    pub async fn start(realm: &str) -> Self {
        Self {
            server: MockServer::start().await,
            realm: realm.to_string(),
        }
    }

    /// The underlying server, for mounting custom mocks.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Base URL to configure the provider with (no trailing slash).
    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    /// Issuer a provider configured against this server expects.
    pub fn issuer(&self) -> String {
        format!("{}/realms/{}", self.server.uri(), self.realm)
    }

    /// Path of the JWKS endpoint.
    pub fn certs_path(&self) -> String {
        self.oidc_path("certs")
    }

    /// Path of the token endpoint.
    pub fn token_path(&self) -> String {
        self.oidc_path("token")
    }

    /// Path of the introspection endpoint.
    pub fn introspect_path(&self) -> String {
        self.oidc_path("token/introspect")
    }

    /// Path of the userinfo endpoint.
    pub fn userinfo_path(&self) -> String {
        self.oidc_path("userinfo")
    }

    /// Path of the logout endpoint.
    pub fn logout_path(&self) -> String {
        self.oidc_path("logout")
    }

    /// Path of the discovery document.
    pub fn discovery_path(&self) -> String {
        format!("/realms/{}/.well-known/openid-configuration", self.realm)
    }

    fn oidc_path(&self, suffix: &str) -> String {
        format!("/realms/{}/protocol/openid-connect/{suffix}", self.realm)
    }

    /// JWKS document publishing `keys`.
    pub fn jwks_body(keys: &[&TestSigningKey]) -> serde_json::Value {
        let keys: Vec<serde_json::Value> = keys.iter().map(|key| key.jwk_json()).collect();
        serde_json::json!({ "keys": keys })
    }

    /// Serve `keys` from the JWKS endpoint for any number of requests.
    pub async fn mount_jwks(&self, keys: &[&TestSigningKey]) {
        Mock::given(method("GET"))
            .and(path(self.certs_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(Self::jwks_body(keys)))
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` from the JWKS endpoint and assert, when the server is
    /// dropped, that it was fetched exactly `expected` times.
    pub async fn mount_jwks_expecting(&self, keys: &[&TestSigningKey], expected: u64) {
        Mock::given(method("GET"))
            .and(path(self.certs_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(Self::jwks_body(keys)))
            .expect(expected)
            .named("jwks")
            .mount(&self.server)
            .await;
    }

    /// Serve a minimal discovery document.
    pub async fn mount_discovery(&self) {
        let issuer = self.issuer();
        let body = serde_json::json!({
            "issuer": issuer,
            "jwks_uri": format!("{}{}", self.base_url(), self.certs_path()),
            "token_endpoint": format!("{}{}", self.base_url(), self.token_path()),
            "userinfo_endpoint": format!("{}{}", self.base_url(), self.userinfo_path()),
        });
        Mock::given(method("GET"))
            .and(path(self.discovery_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Number of requests received so far on `request_path`.
    pub async fn request_count(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| {
                requests
                    .iter()
                    .filter(|request| request.url.path() == request_path)
                    .count()
            })
            .unwrap_or(0)
    }
}
