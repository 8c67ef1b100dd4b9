//! Authentication provider facade.
//!
//! [`AuthProvider`] owns one realm's transport, key store, verifier and
//! service token cache. Each instance is independent, so several providers
//! (one per upstream identity provider) can live in the same process.
//!
//! Construction is all-or-nothing: [`AuthProvider::start`] validates the
//! configuration and performs the first JWKS fetch before returning, along
//! with the [`KeyRefreshTask`] the caller owns and shuts down.

use crate::claims::TokenClaims;
use crate::config::AuthProviderConfig;
use crate::endpoints::{EndpointKind, IdpEndpoints};
use crate::error::AuthError;
use crate::keystore::{KeyRefreshTask, KeyStore, RefreshReport};
use crate::secret::SecretString;
use crate::service_token::{issue_client_credentials, ServiceTokenCache};
use crate::transport::{FormBody, IdpRequest, ResilientTransport};
use crate::verifier::TokenVerifier;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Profile returned by the userinfo endpoint.
#[derive(Clone, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    /// Any other claims the provider includes.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl fmt::Debug for UserInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserInfo")
            .field("sub", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("email_verified", &self.email_verified)
            .field("preferred_username", &self.preferred_username)
            .field("extra_claims", &self.extra.len())
            .finish_non_exhaustive()
    }
}

/// RFC 7662 introspection response.
#[derive(Debug, Clone, Deserialize)]
pub struct IntrospectionResult {
    pub active: bool,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
    /// Remaining fields (`aud`, `iss`, provider-specific claims).
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Result of a refresh-token grant.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: SecretString,
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
    #[serde(default)]
    pub id_token: Option<SecretString>,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Client of one identity provider realm.
pub struct AuthProvider {
    config: AuthProviderConfig,
    endpoints: IdpEndpoints,
    transport: ResilientTransport,
    keys: Arc<KeyStore>,
    verifier: TokenVerifier,
    service_tokens: ServiceTokenCache,
    shutdown: CancellationToken,
}

impl fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthProvider")
            .field("issuer", &self.endpoints.issuer())
            .field("client_id", &self.config.client_id)
            .finish_non_exhaustive()
    }
}

fn unexpected_status(endpoint: EndpointKind, status: StatusCode) -> AuthError {
    AuthError::ServiceUnavailable {
        endpoint,
        attempts: 1,
        reason: format!("unexpected HTTP {status}"),
    }
}

async fn decode_json<T: DeserializeOwned>(
    endpoint: EndpointKind,
    response: reqwest::Response,
) -> Result<T, AuthError> {
    response.json::<T>().await.map_err(|e| {
        warn!(target: "idp_auth.provider", endpoint = %endpoint, error = %e, "Failed to decode response body");
        AuthError::Internal(format!("invalid {endpoint} response: {e}"))
    })
}

impl AuthProvider {
    /// Validate `config`, fetch the realm's keys and start background key
    /// refresh.
    ///
    /// The returned [`KeyRefreshTask`] runs until it is shut down, dropped,
    /// or [`AuthProvider::shutdown`] is called.
    ///
    /// # Errors
    ///
    /// - `AuthError::InvalidConfig` for invalid configuration
    /// - `AuthError::KeyStoreRefreshFailed` or a transport error if the
    ///   initial key fetch fails
    #[instrument(skip_all, fields(realm = %config.realm))]
    pub async fn start(config: AuthProviderConfig) -> Result<(Self, KeyRefreshTask), AuthError> {
        config.validate()?;

        let endpoints = IdpEndpoints::new(&config.base_url, &config.realm);
        let transport = ResilientTransport::new(&config)?;
        let shutdown = CancellationToken::new();

        let keys = Arc::new(
            KeyStore::load(
                transport.clone(),
                endpoints.url(EndpointKind::Certs),
                shutdown.clone(),
            )
            .await?,
        );

        let verifier = TokenVerifier::new(
            Arc::clone(&keys),
            endpoints.issuer(),
            config.client_id.clone(),
            config.clock_skew,
        );

        let task = KeyRefreshTask::spawn(
            Arc::clone(&keys),
            config.public_key_refresh_interval,
            shutdown.child_token(),
        );

        info!(
            target: "idp_auth.provider",
            issuer = %endpoints.issuer(),
            client_id = %config.client_id,
            "Authentication provider started"
        );

        Ok((
            Self {
                config,
                endpoints,
                transport,
                keys,
                verifier,
                service_tokens: ServiceTokenCache::new(),
                shutdown,
            },
            task,
        ))
    }

    #[must_use]
    pub fn endpoints(&self) -> &IdpEndpoints {
        &self.endpoints
    }

    #[must_use]
    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Verify a bearer access token locally.
    ///
    /// # Errors
    ///
    /// See [`TokenVerifier::verify`].
    pub async fn verify_token(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.verifier.verify(token).await
    }

    /// Fetch the user's profile with their access token.
    ///
    /// # Errors
    ///
    /// - `AuthError::TokenRejected` on 401/403
    /// - `AuthError::ServiceUnavailable` on other non-2xx responses
    /// - `AuthError::Internal` if the body cannot be decoded
    #[instrument(skip_all)]
    pub async fn get_user_info(&self, access_token: &str) -> Result<UserInfo, AuthError> {
        let endpoint = EndpointKind::UserInfo;
        let request = IdpRequest::get(endpoint, self.endpoints.url(endpoint))
            .bearer(SecretString::from(access_token));
        let response = self.transport.execute(request, &self.shutdown).await?;

        let status = response.status();
        match status {
            s if s.is_success() => decode_json(endpoint, response).await,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::TokenRejected {
                endpoint,
                status: status.as_u16(),
            }),
            _ => Err(unexpected_status(endpoint, status)),
        }
    }

    /// Ask the identity provider whether `token` is active.
    ///
    /// # Errors
    ///
    /// - `AuthError::TokenIntrospectionFailed` on any non-2xx response or
    ///   an undecodable body
    /// - Transport errors if the provider cannot be reached
    #[instrument(skip_all)]
    pub async fn introspect_token(&self, token: &str) -> Result<IntrospectionResult, AuthError> {
        let endpoint = EndpointKind::Introspect;
        let form = FormBody::new()
            .field("token", token)
            .field("client_id", self.config.client_id.as_str())
            .secret_field("client_secret", &self.config.client_secret);
        let response = self
            .transport
            .execute(
                IdpRequest::post_form(endpoint, self.endpoints.url(endpoint), form),
                &self.shutdown,
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "idp_auth.provider", status = %status, "Introspection request rejected");
            return Err(AuthError::TokenIntrospectionFailed(format!(
                "introspection endpoint returned HTTP {status}"
            )));
        }

        response.json().await.map_err(|e| {
            warn!(target: "idp_auth.provider", error = %e, "Failed to decode introspection response");
            AuthError::TokenIntrospectionFailed(format!("invalid introspection response: {e}"))
        })
    }

    /// Exchange a refresh token for a new token set.
    ///
    /// # Errors
    ///
    /// - `AuthError::TokenRejected` on 400/401 (invalid or expired grant)
    /// - `AuthError::ServiceUnavailable` on other non-2xx responses
    /// - `AuthError::Internal` if the body cannot be decoded
    #[instrument(skip_all)]
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        let endpoint = EndpointKind::Token;
        let form = FormBody::new()
            .field("grant_type", "refresh_token")
            .field("refresh_token", refresh_token)
            .field("client_id", self.config.client_id.as_str())
            .secret_field("client_secret", &self.config.client_secret);
        let response = self
            .transport
            .execute(
                IdpRequest::post_form(endpoint, self.endpoints.url(endpoint), form),
                &self.shutdown,
            )
            .await?;

        let status = response.status();
        match status {
            s if s.is_success() => decode_json(endpoint, response).await,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                warn!(target: "idp_auth.provider", status = %status, "Refresh grant rejected");
                Err(AuthError::TokenRejected {
                    endpoint,
                    status: status.as_u16(),
                })
            }
            _ => Err(unexpected_status(endpoint, status)),
        }
    }

    /// Service token for calls made as this client, from cache when fresh.
    ///
    /// # Errors
    ///
    /// - Transport errors if the token endpoint cannot be reached
    /// - `AuthError::Internal` if the grant is refused or undecodable
    #[instrument(skip_all)]
    pub async fn get_service_token(&self) -> Result<SecretString, AuthError> {
        self.service_tokens
            .get(|| {
                issue_client_credentials(
                    &self.transport,
                    &self.endpoints,
                    &self.config.client_id,
                    &self.config.client_secret,
                    &self.shutdown,
                )
            })
            .await
    }

    /// End the session bound to `refresh_token`. Any 2xx is success.
    ///
    /// # Errors
    ///
    /// - `AuthError::TokenRejected` on 400/401
    /// - `AuthError::ServiceUnavailable` on other non-2xx responses
    #[instrument(skip_all)]
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let endpoint = EndpointKind::Logout;
        let form = FormBody::new()
            .field("refresh_token", refresh_token)
            .field("client_id", self.config.client_id.as_str())
            .secret_field("client_secret", &self.config.client_secret);
        let response = self
            .transport
            .execute(
                IdpRequest::post_form(endpoint, self.endpoints.url(endpoint), form),
                &self.shutdown,
            )
            .await?;

        let status = response.status();
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Err(AuthError::TokenRejected {
                endpoint,
                status: status.as_u16(),
            }),
            _ => Err(unexpected_status(endpoint, status)),
        }
    }

    /// Check that the identity provider serves this realm's discovery
    /// document. Healthy only on exactly HTTP 200; cached state is ignored.
    ///
    /// # Errors
    ///
    /// - `AuthError::ServiceUnavailable` on any other status
    /// - Transport errors if the provider cannot be reached
    #[instrument(skip_all)]
    pub async fn health(&self) -> Result<(), AuthError> {
        let endpoint = EndpointKind::Discovery;
        let response = self
            .transport
            .execute(
                IdpRequest::get(endpoint, self.endpoints.url(endpoint)),
                &self.shutdown,
            )
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(unexpected_status(endpoint, status)),
        }
    }

    /// Refresh the key set now, outside the background schedule.
    ///
    /// # Errors
    ///
    /// See [`KeyStore::refresh`].
    pub async fn refresh_keys(&self) -> Result<RefreshReport, AuthError> {
        self.keys.refresh().await
    }

    /// Cancel in-flight and future requests and stop background key
    /// refresh. Await [`KeyRefreshTask::shutdown`] to wait for the task.
    pub fn shutdown(&self) {
        info!(target: "idp_auth.provider", "Authentication provider shutting down");
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
