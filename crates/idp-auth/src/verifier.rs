//! Access token verification.
//!
//! Order of checks:
//! 1. Size, structure and header (`alg` in the RSA family, non-empty `kid`)
//! 2. Key resolution through the [`KeyStore`], refreshing once on a miss
//! 3. Signature, `exp` (required) and `nbf` (if present) with configured leeway
//! 4. Exact issuer match
//! 5. Audience contains the client id, or `azp` equals it
//!
//! Claims of unexpected shape never fail verification; they are omitted
//! from the returned [`TokenClaims`].

use crate::claims::{RawClaims, TokenClaims};
use crate::error::AuthError;
use crate::jwt::inspect_header;
use crate::keystore::KeyStore;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Validation};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Verifies bearer tokens against one realm and client.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    keys: Arc<KeyStore>,
    issuer: String,
    client_id: String,
    leeway: Duration,
}

impl TokenVerifier {
    /// # Arguments
    ///
    /// * `keys` - Key store for the realm
    /// * `issuer` - Exact expected `iss` value
    /// * `client_id` - Client id that must appear in `aud` or `azp`
    /// * `leeway` - Clock skew tolerance for `exp` and `nbf`
    #[must_use]
    pub fn new(
        keys: Arc<KeyStore>,
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        leeway: Duration,
    ) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            client_id: client_id.into(),
            leeway,
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Verify `token` and return its claims.
    ///
    /// # Errors
    ///
    /// - `TokenMalformed` - structure, header, algorithm or `kid` problems
    /// - `TokenInvalidSignature` - unknown key or bad signature
    /// - `TokenExpired` / `TokenNotYetValid` - time claims out of range
    /// - `TokenInvalidIssuer` - `iss` does not match exactly
    /// - `TokenInvalidAudience` - neither `aud` nor `azp` names this client
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let header = inspect_header(token)?;

        let key = match self.keys.get_or_refresh(&header.kid).await {
            Ok(Some(key)) => key,
            Ok(None) => {
                debug!(target: "idp_auth.verifier", kid = %header.kid, "Token rejected: unknown signing key");
                return Err(AuthError::TokenInvalidSignature(format!(
                    "unknown signing key '{}'",
                    header.kid
                )));
            }
            Err(e) => {
                debug!(target: "idp_auth.verifier", kid = %header.kid, error = %e, "Token rejected: key resolution failed");
                return Err(AuthError::TokenInvalidSignature(format!(
                    "signing key '{}' could not be resolved",
                    header.kid
                )));
            }
        };

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<RawClaims>(token, key.decoding_key(), &validation).map_err(|e| {
            debug!(target: "idp_auth.verifier", error = %e, "Token rejected: validation failed");
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
                ErrorKind::InvalidSignature | ErrorKind::InvalidRsaKey(_) => {
                    AuthError::TokenInvalidSignature("signature verification failed".into())
                }
                _ => AuthError::TokenMalformed(format!("token validation failed: {e}")),
            }
        })?;

        let claims = TokenClaims::from(data.claims);

        if claims.issuer != self.issuer {
            debug!(
                target: "idp_auth.verifier",
                expected = %self.issuer,
                actual = %claims.issuer,
                "Token rejected: issuer mismatch"
            );
            return Err(AuthError::TokenInvalidIssuer(claims.issuer));
        }

        if !claims.is_intended_for(&self.client_id) {
            debug!(
                target: "idp_auth.verifier",
                client_id = %self.client_id,
                "Token rejected: audience mismatch"
            );
            return Err(AuthError::TokenInvalidAudience);
        }

        debug!(target: "idp_auth.verifier", kid = %header.kid, "Token verified");
        Ok(claims)
    }
}
