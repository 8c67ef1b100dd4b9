//! Resilient HTTP transport to the identity provider.
//!
//! Every outbound call goes through [`ResilientTransport::execute`], which
//! retries network failures and 5xx responses with exponential backoff
//! (`base_delay * 2^(attempt-1)`). Both the in-flight request and the
//! backoff sleep race the caller's [`CancellationToken`].
//!
//! Whether a body can be re-sent is part of its type: [`RequestBody::Form`],
//! [`RequestBody::Bytes`] and [`RequestBody::Empty`] are replayed on retry;
//! [`RequestBody::OneShot`] is sent exactly once.

use crate::config::AuthProviderConfig;
use crate::endpoints::EndpointKind;
use crate::error::AuthError;
use crate::secret::{ExposeSecret, SecretString};
use bytes::Bytes;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// TCP connect timeout, independent of the overall request timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// URL-encoded form fields.
///
/// Values routinely include the client secret or a refresh token, so
/// `Debug` prints field names only.
#[derive(Clone, Default)]
pub struct FormBody {
    fields: Vec<(&'static str, String)>,
}

impl FormBody {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field.
    #[must_use]
    pub fn field(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.fields.push((name, value.into()));
        self
    }

    /// Append a secret field.
    #[must_use]
    pub fn secret_field(self, name: &'static str, value: &SecretString) -> Self {
        self.field(name, value.expose_secret())
    }

    /// Field names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|(name, _)| *name)
    }
}

impl fmt::Debug for FormBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormBody")
            .field("fields", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

/// Request body, tagged with whether it can be replayed on retry.
pub enum RequestBody {
    Empty,
    Form(FormBody),
    Bytes(Bytes),
    /// Streaming body that cannot be rebuilt; never retried.
    OneShot(reqwest::Body),
}

impl RequestBody {
    /// Wrap an arbitrary `reqwest::Body`.
    ///
    /// Buffered bodies are copied into a replayable [`RequestBody::Bytes`];
    /// streaming bodies become [`RequestBody::OneShot`].
    #[must_use]
    pub fn from_body(body: reqwest::Body) -> Self {
        match body.as_bytes() {
            Some(buffered) => RequestBody::Bytes(Bytes::copy_from_slice(buffered)),
            None => RequestBody::OneShot(body),
        }
    }

    /// Whether the body can be sent more than once.
    #[must_use]
    pub fn is_replayable(&self) -> bool {
        !matches!(self, RequestBody::OneShot(_))
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Form(form) => f.debug_tuple("Form").field(form).finish(),
            RequestBody::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            RequestBody::OneShot(_) => f.write_str("OneShot"),
        }
    }
}

/// A request to one identity provider endpoint.
#[derive(Debug)]
pub struct IdpRequest {
    endpoint: EndpointKind,
    method: Method,
    url: String,
    bearer: Option<SecretString>,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: RequestBody,
}

impl IdpRequest {
    #[must_use]
    pub fn new(endpoint: EndpointKind, method: Method, url: impl Into<String>) -> Self {
        Self {
            endpoint,
            method,
            url: url.into(),
            bearer: None,
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    #[must_use]
    pub fn get(endpoint: EndpointKind, url: impl Into<String>) -> Self {
        Self::new(endpoint, Method::GET, url)
    }

    /// POST with a URL-encoded form body.
    #[must_use]
    pub fn post_form(endpoint: EndpointKind, url: impl Into<String>, form: FormBody) -> Self {
        Self::new(endpoint, Method::POST, url).body(RequestBody::Form(form))
    }

    /// Send `Authorization: Bearer <token>`.
    #[must_use]
    pub fn bearer(mut self, token: SecretString) -> Self {
        self.bearer = Some(token);
        self
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }

    #[must_use]
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> EndpointKind {
        self.endpoint
    }
}

/// Outcome of a failed attempt.
enum AttemptFailure {
    Network(reqwest::Error),
    Status(StatusCode),
}

impl AttemptFailure {
    fn into_error(self, endpoint: EndpointKind, attempts: u32) -> AuthError {
        match self {
            AttemptFailure::Network(source) => AuthError::Transport {
                endpoint,
                attempts,
                source,
            },
            AttemptFailure::Status(status) => AuthError::ServiceUnavailable {
                endpoint,
                attempts,
                reason: format!("HTTP {status}"),
            },
        }
    }
}

/// HTTP executor with retry, backoff and cancellation.
#[derive(Debug, Clone)]
pub struct ResilientTransport {
    client: reqwest::Client,
    max_attempts: u32,
    base_delay: Duration,
}

impl ResilientTransport {
    /// Build the transport and its HTTP client from provider configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidConfig` if the HTTP client cannot be built.
    pub fn new(config: &AuthProviderConfig) -> Result<Self, AuthError> {
        if config.tls_insecure_skip_verify {
            warn!(
                target: "idp_auth.transport",
                "TLS certificate verification is disabled"
            );
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(config.tls_insecure_skip_verify)
            .build()
            .map_err(|e| AuthError::InvalidConfig(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(
            client,
            config.retry_attempts,
            config.retry_delay,
        ))
    }

    /// Use an existing client. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn with_client(client: reqwest::Client, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            client,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Execute `request`, retrying network failures and 5xx responses.
    ///
    /// Any non-5xx response (including 4xx) is returned as-is for the caller
    /// to interpret.
    ///
    /// # Errors
    ///
    /// - `AuthError::Cancelled` if `cancel` fires while sending or waiting
    /// - `AuthError::Transport` if the last attempt failed at the network level
    /// - `AuthError::ServiceUnavailable` if the last attempt returned a 5xx
    #[instrument(skip_all, fields(endpoint = %request.endpoint))]
    pub async fn execute(
        &self,
        request: IdpRequest,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, AuthError> {
        let IdpRequest {
            endpoint,
            method,
            url,
            bearer,
            headers,
            body,
        } = request;

        let (replayable, mut one_shot) = match body {
            RequestBody::OneShot(body) => (None, Some(body)),
            other => (Some(other), None),
        };
        let max_attempts = if replayable.is_some() {
            self.max_attempts
        } else {
            1
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let mut builder = self.client.request(method.clone(), &url);
            for (name, value) in &headers {
                builder = builder.header(name.clone(), value.clone());
            }
            if let Some(token) = &bearer {
                builder = builder.bearer_auth(token.expose_secret());
            }
            builder = match (&replayable, one_shot.take()) {
                (Some(RequestBody::Form(form)), _) => builder.form(&form.fields),
                (Some(RequestBody::Bytes(bytes)), _) => builder.body(bytes.clone()),
                (_, Some(body)) => builder.body(body),
                _ => builder,
            };

            debug!(
                target: "idp_auth.transport",
                endpoint = %endpoint,
                attempt,
                max_attempts,
                "Sending request to identity provider"
            );

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(target: "idp_auth.transport", endpoint = %endpoint, "Request cancelled in flight");
                    return Err(AuthError::Cancelled { endpoint });
                }
                result = builder.send() => result,
            };

            let failure = match outcome {
                Ok(response) if response.status().is_server_error() => {
                    AttemptFailure::Status(response.status())
                }
                Ok(response) => return Ok(response),
                Err(e) => AttemptFailure::Network(e),
            };

            if attempt >= max_attempts {
                warn!(
                    target: "idp_auth.transport",
                    endpoint = %endpoint,
                    attempts = attempt,
                    "Identity provider request failed, retries exhausted"
                );
                return Err(failure.into_error(endpoint, attempt));
            }

            let delay = self.backoff(attempt);
            match &failure {
                AttemptFailure::Network(e) => warn!(
                    target: "idp_auth.transport",
                    endpoint = %endpoint,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Request failed, will retry"
                ),
                AttemptFailure::Status(status) => warn!(
                    target: "idp_auth.transport",
                    endpoint = %endpoint,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    status = %status,
                    "Server error, will retry"
                ),
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(target: "idp_auth.transport", endpoint = %endpoint, "Retry wait cancelled");
                    return Err(AuthError::Cancelled { endpoint });
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
