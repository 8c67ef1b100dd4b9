//! Signature-free inspection of JWT headers.
//!
//! The verifier needs `alg` and `kid` before it can pick a key, so the header
//! is read without touching the signature. Nothing returned here is trusted:
//! the token MUST still be verified against the resolved key.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE any decoding
//! - Only RSA-family asymmetric algorithms are accepted; `none`, HMAC and EC
//!   algorithms are rejected here, before key lookup
//! - Error messages never include token content

use crate::error::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::Algorithm;

/// Maximum accepted token size in bytes (16KB).
///
/// Keycloak access tokens carrying many roles and groups are commonly 2-4KB.
/// Anything above this limit is rejected before base64 decoding.
pub const MAX_TOKEN_SIZE_BYTES: usize = 16 * 1024;

/// Header fields needed to select and apply a verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Signing algorithm, guaranteed to be RSA-family.
    pub alg: Algorithm,
    /// Key id, guaranteed non-empty.
    pub kid: String,
}

/// Map a JOSE `alg` name to an accepted RSA-family algorithm.
#[must_use]
pub fn rsa_algorithm(name: &str) -> Option<Algorithm> {
    match name {
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        "PS256" => Some(Algorithm::PS256),
        "PS384" => Some(Algorithm::PS384),
        "PS512" => Some(Algorithm::PS512),
        _ => None,
    }
}

/// Read `alg` and `kid` from a JWT header without verifying the signature.
///
/// # Errors
///
/// Returns `AuthError::TokenMalformed` when the token is too large, is not
/// three dot-separated segments, has an undecodable header, uses a
/// non-RSA algorithm, or has a missing/empty `kid`.
pub fn inspect_header(token: &str) -> Result<TokenHeader, AuthError> {
    if token.len() > MAX_TOKEN_SIZE_BYTES {
        tracing::debug!(
            target: "idp_auth.verifier",
            token_size = token.len(),
            max_size = MAX_TOKEN_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(AuthError::TokenMalformed("token too large".into()));
    }

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        tracing::debug!(
            target: "idp_auth.verifier",
            parts = parts.len(),
            "Token rejected: invalid JWT format"
        );
        return Err(AuthError::TokenMalformed("expected three segments".into()));
    }

    let header_part = parts
        .first()
        .ok_or_else(|| AuthError::TokenMalformed("expected three segments".into()))?;
    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "idp_auth.verifier", error = %e, "Failed to decode JWT header base64");
        AuthError::TokenMalformed("header is not base64url".into())
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "idp_auth.verifier", error = %e, "Failed to parse JWT header JSON");
        AuthError::TokenMalformed("header is not a JSON object".into())
    })?;

    let alg_name = header
        .get("alg")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AuthError::TokenMalformed("missing alg".into()))?;
    let alg = rsa_algorithm(alg_name).ok_or_else(|| {
        tracing::debug!(target: "idp_auth.verifier", alg = %alg_name, "Token rejected: algorithm not allowed");
        AuthError::TokenMalformed(format!("algorithm '{alg_name}' is not allowed"))
    })?;

    let kid = header
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| AuthError::TokenMalformed("missing kid".into()))?;

    Ok(TokenHeader { alg, kid })
}
