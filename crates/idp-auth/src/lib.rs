//! Client-side authentication against an OIDC identity provider realm.
//!
//! Verifies bearer access tokens against the realm's published RSA keys,
//! keeps those keys fresh, talks to the provider's token, introspection,
//! userinfo and logout endpoints with retry and cancellation, and caches a
//! client-credentials service token.
//!
//! # Usage
//!
//! ```rust,ignore
//! use idp_auth::{AuthProvider, AuthProviderConfig, SecretString};
//!
//! let config = AuthProviderConfig::new(
//!     "https://idp.example.com",
//!     "acme",
//!     "svc",
//!     SecretString::from("client-secret"),
//! );
//! let (provider, refresh_task) = AuthProvider::start(config).await?;
//!
//! let claims = provider.verify_token(bearer).await?;
//!
//! provider.shutdown();
//! refresh_task.shutdown().await;
//! ```

#![warn(clippy::pedantic)]

/// Module for provider configuration
pub mod config;

/// Module for identity provider URL layout
pub mod endpoints;

/// Module for error types
pub mod error;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for signature-free JWT header inspection
pub mod jwt;

/// Module for verified token claims
pub mod claims;

/// Module for HTTP transport with retry and cancellation
pub mod transport;

/// Module for the signing key store and its refresh task
pub mod keystore;

/// Module for access token verification
pub mod verifier;

/// Module for the cached client-credentials token
pub mod service_token;

/// Module for the provider facade
pub mod provider;

pub use claims::TokenClaims;
pub use config::{AuthProviderConfig, ConfigError};
pub use endpoints::{EndpointKind, IdpEndpoints};
pub use error::{AuthError, AuthErrorKind};
pub use keystore::{KeyRefreshTask, KeyStore, RefreshReport};
pub use provider::{AuthProvider, IntrospectionResult, TokenSet, UserInfo};
pub use secret::{ExposeSecret, SecretString};
pub use verifier::TokenVerifier;
