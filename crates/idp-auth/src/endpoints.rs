//! Identity provider endpoint layout.
//!
//! All URLs are derived once, at construction, from the configured base URL
//! and realm. The issuer string computed here is the exact value every
//! verified token's `iss` claim is compared against.

use std::fmt;

/// Endpoint family, used to label requests in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// JWKS document (`.../certs`).
    Certs,
    /// `UserInfo` endpoint.
    UserInfo,
    /// Token introspection endpoint.
    Introspect,
    /// Token endpoint (refresh and client-credentials grants).
    Token,
    /// Logout endpoint.
    Logout,
    /// OpenID discovery document.
    Discovery,
}

impl EndpointKind {
    /// Stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointKind::Certs => "certs",
            EndpointKind::UserInfo => "userinfo",
            EndpointKind::Introspect => "introspect",
            EndpointKind::Token => "token",
            EndpointKind::Logout => "logout",
            EndpointKind::Discovery => "discovery",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully-resolved endpoint URLs for one realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdpEndpoints {
    issuer: String,
    certs: String,
    userinfo: String,
    introspect: String,
    token: String,
    logout: String,
    discovery: String,
}

impl IdpEndpoints {
    /// Build the endpoint set. A single trailing slash on `base_url` is
    /// trimmed so that `https://idp/` and `https://idp` resolve identically.
    #[must_use]
    pub fn new(base_url: &str, realm: &str) -> Self {
        let base = base_url.strip_suffix('/').unwrap_or(base_url);
        let issuer = format!("{base}/realms/{realm}");
        let oidc = format!("{issuer}/protocol/openid-connect");

        Self {
            certs: format!("{oidc}/certs"),
            userinfo: format!("{oidc}/userinfo"),
            introspect: format!("{oidc}/token/introspect"),
            token: format!("{oidc}/token"),
            logout: format!("{oidc}/logout"),
            discovery: format!("{issuer}/.well-known/openid-configuration"),
            issuer,
        }
    }

    /// Expected `iss` claim.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// URL for an endpoint family.
    #[must_use]
    pub fn url(&self, kind: EndpointKind) -> &str {
        match kind {
            EndpointKind::Certs => &self.certs,
            EndpointKind::UserInfo => &self.userinfo,
            EndpointKind::Introspect => &self.introspect,
            EndpointKind::Token => &self.token,
            EndpointKind::Logout => &self.logout,
            EndpointKind::Discovery => &self.discovery,
        }
    }
}
