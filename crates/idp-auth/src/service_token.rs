//! Cached machine-to-machine token.
//!
//! [`ServiceTokenCache`] holds at most one token. Callers hit a shared-lock
//! fast path while the token has more than [`EXPIRY_MARGIN_SECS`] left; otherwise
//! the first caller takes the exclusive lock, re-checks, and issues a new
//! token while holding it. Callers that arrive during issuance wait on the
//! lock and then read the fresh token, so a burst of cache misses produces a
//! single client-credentials request.

use crate::endpoints::{EndpointKind, IdpEndpoints};
use crate::error::AuthError;
use crate::secret::SecretString;
use crate::transport::{FormBody, IdpRequest, ResilientTransport};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::future::Future;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// A cached token is only served while it has more than this many seconds left.
pub const EXPIRY_MARGIN_SECS: i64 = 30;

/// Upper bound applied to `expires_in` from the token endpoint.
const MAX_EXPIRES_IN_SECS: i64 = 86_400 * 365;

/// An issued service token.
#[derive(Debug, Clone)]
pub struct ServiceToken {
    pub value: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl ServiceToken {
    /// Whether the token can still be served at `now`.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

/// Single-slot token cache.
#[derive(Debug, Default)]
pub struct ServiceTokenCache {
    slot: RwLock<Option<ServiceToken>>,
}

impl ServiceTokenCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token, calling `issue` only when it is missing or
    /// about to expire.
    ///
    /// # Errors
    ///
    /// Returns whatever `issue` returns; the cache is left unchanged.
    pub async fn get<F, Fut>(&self, issue: F) -> Result<SecretString, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ServiceToken, AuthError>>,
    {
        {
            let slot = self.slot.read().await;
            if let Some(token) = slot.as_ref().filter(|t| t.is_fresh_at(Utc::now())) {
                return Ok(token.value.clone());
            }
        }

        let mut slot = self.slot.write().await;
        if let Some(token) = slot.as_ref().filter(|t| t.is_fresh_at(Utc::now())) {
            debug!(target: "idp_auth.service_token", "Service token refreshed by concurrent caller");
            return Ok(token.value.clone());
        }

        let token = issue().await?;
        debug!(
            target: "idp_auth.service_token",
            expires_at = %token.expires_at,
            "Service token issued"
        );
        let value = token.value.clone();
        *slot = Some(token);
        Ok(value)
    }

    /// Drop the cached token so the next `get` issues a new one.
    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }
}

#[derive(Deserialize)]
struct ClientCredentialsResponse {
    access_token: SecretString,
    expires_in: i64,
}

/// Perform a client-credentials grant against the token endpoint.
///
/// # Errors
///
/// - Transport errors (`ServiceUnavailable`, `Transport`, `Cancelled`)
/// - `AuthError::Internal` if the grant is refused or the response cannot
///   be decoded
#[instrument(skip_all)]
pub async fn issue_client_credentials(
    transport: &ResilientTransport,
    endpoints: &IdpEndpoints,
    client_id: &str,
    client_secret: &SecretString,
    cancel: &CancellationToken,
) -> Result<ServiceToken, AuthError> {
    let form = FormBody::new()
        .field("grant_type", "client_credentials")
        .field("client_id", client_id)
        .secret_field("client_secret", client_secret);

    let response = transport
        .execute(
            IdpRequest::post_form(EndpointKind::Token, endpoints.url(EndpointKind::Token), form),
            cancel,
        )
        .await?;

    let status = response.status();
    if !status.is_success() {
        warn!(
            target: "idp_auth.service_token",
            status = %status,
            client_id = %client_id,
            "Client credentials grant rejected"
        );
        return Err(AuthError::Internal(format!(
            "client credentials grant rejected: HTTP {status}"
        )));
    }

    let body: ClientCredentialsResponse = response.json().await.map_err(|e| {
        warn!(target: "idp_auth.service_token", error = %e, "Failed to parse token response");
        AuthError::Internal(format!("invalid token response: {e}"))
    })?;

    Ok(ServiceToken {
        value: body.access_token,
        expires_at: Utc::now() + Duration::seconds(body.expires_in.clamp(0, MAX_EXPIRES_IN_SECS)),
    })
}
