//! Error types for the authentication provider.
//!
//! Token-related variants carry only short diagnostic context and never the
//! token itself. Transport-related variants name the endpoint family and the
//! number of attempts made; request bodies (which carry the client secret)
//! are never included.

use crate::endpoints::EndpointKind;
use thiserror::Error;

/// Errors produced by the authentication provider.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Token is not a structurally valid JWT, uses a disallowed algorithm,
    /// or lacks a `kid`.
    #[error("Malformed token: {0}")]
    TokenMalformed(String),

    /// Signing key unknown or signature does not verify.
    #[error("Invalid token signature: {0}")]
    TokenInvalidSignature(String),

    /// `exp` is in the past.
    #[error("Token has expired")]
    TokenExpired,

    /// `nbf` is in the future.
    #[error("Token is not yet valid")]
    TokenNotYetValid,

    /// `iss` does not match the configured realm.
    #[error("Token issuer '{0}' is not trusted")]
    TokenInvalidIssuer(String),

    /// Neither `aud` nor `azp` names this client.
    #[error("Token audience does not include this client")]
    TokenInvalidAudience,

    /// The identity provider refused the presented token or grant.
    #[error("Token rejected by identity provider ({endpoint}, status {status})")]
    TokenRejected {
        /// Endpoint family that refused the token.
        endpoint: EndpointKind,
        /// HTTP status returned.
        status: u16,
    },

    /// Introspection request failed or returned an unusable document.
    #[error("Token introspection failed: {0}")]
    TokenIntrospectionFailed(String),

    /// JWKS document could not be fetched or contained no usable keys.
    #[error("Key store refresh failed: {0}")]
    KeyStoreRefreshFailed(String),

    /// The identity provider is unreachable or answered with server errors.
    #[error("Identity provider unavailable ({endpoint}, {attempts} attempts): {reason}")]
    ServiceUnavailable {
        /// Endpoint family being called.
        endpoint: EndpointKind,
        /// Attempts made before giving up.
        attempts: u32,
        /// Short description of the last failure.
        reason: String,
    },

    /// Network-level failure after exhausting retries.
    #[error("Transport error ({endpoint}, {attempts} attempts): {source}")]
    Transport {
        /// Endpoint family being called.
        endpoint: EndpointKind,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last network error observed.
        source: reqwest::Error,
    },

    /// Caller cancelled the request (or the provider is shutting down).
    #[error("Request to {endpoint} cancelled")]
    Cancelled {
        /// Endpoint family being called.
        endpoint: EndpointKind,
    },

    /// Missing or invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected protocol response or local failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Flat classification of [`AuthError`] for callers that map errors onto
/// protocol responses (e.g. 401 vs 503 in HTTP middleware).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    TokenMalformed,
    TokenInvalidSignature,
    TokenExpired,
    TokenNotYetValid,
    TokenInvalidIssuer,
    TokenInvalidAudience,
    TokenRejected,
    TokenIntrospectionFailed,
    KeyStoreRefreshFailed,
    ServiceUnavailable,
    Cancelled,
    InvalidConfig,
    Internal,
}

impl AuthError {
    /// Classify this error.
    ///
    /// Network failures classify as `ServiceUnavailable`.
    #[must_use]
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            AuthError::TokenMalformed(_) => AuthErrorKind::TokenMalformed,
            AuthError::TokenInvalidSignature(_) => AuthErrorKind::TokenInvalidSignature,
            AuthError::TokenExpired => AuthErrorKind::TokenExpired,
            AuthError::TokenNotYetValid => AuthErrorKind::TokenNotYetValid,
            AuthError::TokenInvalidIssuer(_) => AuthErrorKind::TokenInvalidIssuer,
            AuthError::TokenInvalidAudience => AuthErrorKind::TokenInvalidAudience,
            AuthError::TokenRejected { .. } => AuthErrorKind::TokenRejected,
            AuthError::TokenIntrospectionFailed(_) => AuthErrorKind::TokenIntrospectionFailed,
            AuthError::KeyStoreRefreshFailed(_) => AuthErrorKind::KeyStoreRefreshFailed,
            AuthError::ServiceUnavailable { .. } | AuthError::Transport { .. } => {
                AuthErrorKind::ServiceUnavailable
            }
            AuthError::Cancelled { .. } => AuthErrorKind::Cancelled,
            AuthError::InvalidConfig(_) => AuthErrorKind::InvalidConfig,
            AuthError::Internal(_) => AuthErrorKind::Internal,
        }
    }

    /// Whether the error is about the presented token rather than about
    /// the provider or local state.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(
            self.kind(),
            AuthErrorKind::TokenMalformed
                | AuthErrorKind::TokenInvalidSignature
                | AuthErrorKind::TokenExpired
                | AuthErrorKind::TokenNotYetValid
                | AuthErrorKind::TokenInvalidIssuer
                | AuthErrorKind::TokenInvalidAudience
                | AuthErrorKind::TokenRejected
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(AuthError::TokenExpired.kind(), AuthErrorKind::TokenExpired);
        assert_eq!(
            AuthError::ServiceUnavailable {
                endpoint: EndpointKind::Certs,
                attempts: 3,
                reason: "HTTP 503".into(),
            }
            .kind(),
            AuthErrorKind::ServiceUnavailable
        );
        assert_eq!(
            AuthError::InvalidConfig("x".into()).kind(),
            AuthErrorKind::InvalidConfig
        );
    }

    #[test]
    fn test_is_token_error() {
        assert!(AuthError::TokenInvalidAudience.is_token_error());
        assert!(AuthError::TokenRejected {
            endpoint: EndpointKind::UserInfo,
            status: 401
        }
        .is_token_error());
        assert!(!AuthError::KeyStoreRefreshFailed("down".into()).is_token_error());
        assert!(!AuthError::Cancelled {
            endpoint: EndpointKind::Token
        }
        .is_token_error());
    }

    #[test]
    fn test_service_unavailable_display_has_context() {
        let err = AuthError::ServiceUnavailable {
            endpoint: EndpointKind::Token,
            attempts: 3,
            reason: "HTTP 502 Bad Gateway".into(),
        };
        let message = err.to_string();

        assert!(message.contains("token"));
        assert!(message.contains("3 attempts"));
        assert!(message.contains("502"));
    }
}
