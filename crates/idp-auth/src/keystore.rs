//! Signing key store for the identity provider's JWKS.
//!
//! The key set is fetched once at construction ([`KeyStore::load`]) and then
//! replaced wholesale by every successful [`KeyStore::refresh`]. Readers take
//! the shared lock only long enough to clone an `Arc`; the writer takes the
//! exclusive lock only for the swap itself, after the network fetch and
//! parsing have finished.
//!
//! A key that disappears from a refreshed document is unverifiable
//! immediately. There is no grace window for rotated-out keys.

use crate::endpoints::EndpointKind;
use crate::error::AuthError;
use crate::transport::{IdpRequest, ResilientTransport};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// RSA keys below this modulus size are loaded but logged as weak.
pub const WEAK_RSA_MODULUS_BITS: usize = 2048;

/// An RSA verification key published by the identity provider.
pub struct SigningKey {
    kid: String,
    modulus: Vec<u8>,
    exponent: Vec<u8>,
    decoding: DecodingKey,
}

impl SigningKey {
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Big-endian modulus bytes, without leading zeros.
    #[must_use]
    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    /// Big-endian public exponent bytes, without leading zeros.
    #[must_use]
    pub fn exponent(&self) -> &[u8] {
        &self.exponent
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("modulus_bits", &modulus_bits(&self.modulus))
            .finish_non_exhaustive()
    }
}

/// Immutable snapshot of the published keys.
#[derive(Debug, Default)]
pub struct KeySet {
    keys: HashMap<String, Arc<SigningKey>>,
}

impl KeySet {
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.keys.get(kid).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key ids in sorted order.
    #[must_use]
    pub fn kids(&self) -> Vec<String> {
        let mut kids: Vec<String> = self.keys.keys().cloned().collect();
        kids.sort();
        kids
    }
}

/// Why a JWKS entry was not loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Entry is not a JSON object of the expected shape.
    Unparseable,
    MissingKid,
    UnsupportedKeyType(String),
    /// `use` is `enc`.
    EncryptionKey,
    UnsupportedAlgorithm(String),
    MalformedModulus,
    MalformedExponent,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unparseable => f.write_str("unparseable entry"),
            SkipReason::MissingKid => f.write_str("missing kid"),
            SkipReason::UnsupportedKeyType(kty) => write!(f, "unsupported key type '{kty}'"),
            SkipReason::EncryptionKey => f.write_str("encryption key"),
            SkipReason::UnsupportedAlgorithm(alg) => write!(f, "unsupported algorithm '{alg}'"),
            SkipReason::MalformedModulus => f.write_str("malformed modulus"),
            SkipReason::MalformedExponent => f.write_str("malformed exponent"),
        }
    }
}

/// A JWKS entry that was skipped during refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedKey {
    pub kid: Option<String>,
    pub reason: SkipReason,
}

/// Result of a successful refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Number of keys now in the store.
    pub loaded: usize,
    pub skipped: Vec<SkippedKey>,
}

/// JWKS entry fields relevant to RSA signature keys.
#[derive(Debug, Deserialize)]
struct JwkEntry {
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    kty: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default, rename = "use")]
    key_use: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<serde_json::Value>,
}

fn modulus_bits(modulus: &[u8]) -> usize {
    match modulus.first() {
        Some(first) => (modulus.len() - 1) * 8 + (8 - first.leading_zeros() as usize),
        None => 0,
    }
}

/// Decode a base64url big-endian integer, tolerating padding and stripping
/// leading zero bytes.
fn decode_uint(value: Option<&str>) -> Option<Vec<u8>> {
    let encoded = value?.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    let start = bytes.iter().position(|b| *b != 0)?;
    bytes.get(start..).map(<[u8]>::to_vec)
}

fn parse_entry(value: serde_json::Value) -> Result<SigningKey, SkippedKey> {
    let entry: JwkEntry = serde_json::from_value(value).map_err(|_| SkippedKey {
        kid: None,
        reason: SkipReason::Unparseable,
    })?;

    let skip = |reason| SkippedKey {
        kid: entry.kid.clone(),
        reason,
    };

    let kid = entry
        .kid
        .as_deref()
        .filter(|kid| !kid.is_empty())
        .ok_or_else(|| skip(SkipReason::MissingKid))?;

    match entry.kty.as_deref() {
        Some("RSA") => {}
        other => {
            return Err(skip(SkipReason::UnsupportedKeyType(
                other.unwrap_or_default().to_string(),
            )))
        }
    }
    if entry.key_use.as_deref() == Some("enc") {
        return Err(skip(SkipReason::EncryptionKey));
    }
    if let Some(alg) = entry.alg.as_deref() {
        if crate::jwt::rsa_algorithm(alg).is_none() {
            return Err(skip(SkipReason::UnsupportedAlgorithm(alg.to_string())));
        }
    }

    let modulus =
        decode_uint(entry.n.as_deref()).ok_or_else(|| skip(SkipReason::MalformedModulus))?;
    let exponent =
        decode_uint(entry.e.as_deref()).ok_or_else(|| skip(SkipReason::MalformedExponent))?;

    let bits = modulus_bits(&modulus);
    if bits < WEAK_RSA_MODULUS_BITS {
        warn!(
            target: "idp_auth.keystore",
            kid = %kid,
            modulus_bits = bits,
            "JWKS entry uses a weak RSA modulus"
        );
    }

    let decoding = DecodingKey::from_rsa_raw_components(&modulus, &exponent);

    Ok(SigningKey {
        kid: kid.to_string(),
        modulus,
        exponent,
        decoding,
    })
}

/// Parse a JWKS document body into a key set, recording skipped entries.
fn parse_jwks(document: JwksDocument) -> (KeySet, Vec<SkippedKey>) {
    let mut keys = HashMap::new();
    let mut skipped = Vec::new();

    for value in document.keys {
        match parse_entry(value) {
            Ok(key) => {
                keys.insert(key.kid.clone(), Arc::new(key));
            }
            Err(skip) => skipped.push(skip),
        }
    }

    (KeySet { keys }, skipped)
}

/// Holds the current signing keys.
pub struct KeyStore {
    transport: ResilientTransport,
    jwks_url: String,
    cancel: CancellationToken,
    keys: RwLock<Arc<KeySet>>,
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("jwks_url", &self.jwks_url)
            .finish_non_exhaustive()
    }
}

impl KeyStore {
    /// Create a store and perform the initial fetch.
    ///
    /// `cancel` is passed to every JWKS request the store makes.
    ///
    /// # Errors
    ///
    /// Fails if the initial fetch fails or yields no usable keys; a store
    /// is never handed out empty.
    #[instrument(skip_all)]
    pub async fn load(
        transport: ResilientTransport,
        jwks_url: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<Self, AuthError> {
        let store = Self {
            transport,
            jwks_url: jwks_url.into(),
            cancel,
            keys: RwLock::new(Arc::new(KeySet::default())),
        };
        store.refresh().await?;
        Ok(store)
    }

    /// Fetch the JWKS document and swap in the new key set.
    ///
    /// Unusable entries are skipped and reported. On any error the previous
    /// key set stays in place.
    ///
    /// # Errors
    ///
    /// - `AuthError::KeyStoreRefreshFailed` for non-2xx responses, an
    ///   unparseable document or a document with no usable keys
    /// - Transport errors (`ServiceUnavailable`, `Transport`, `Cancelled`)
    #[instrument(skip_all)]
    pub async fn refresh(&self) -> Result<RefreshReport, AuthError> {
        debug!(target: "idp_auth.keystore", url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .transport
            .execute(
                IdpRequest::get(EndpointKind::Certs, self.jwks_url.clone()),
                &self.cancel,
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "idp_auth.keystore", status = %status, "JWKS endpoint returned error");
            return Err(AuthError::KeyStoreRefreshFailed(format!(
                "JWKS endpoint returned HTTP {status}"
            )));
        }

        let document: JwksDocument = response.json().await.map_err(|e| {
            warn!(target: "idp_auth.keystore", error = %e, "Failed to parse JWKS response");
            AuthError::KeyStoreRefreshFailed(format!("invalid JWKS document: {e}"))
        })?;

        let (key_set, skipped) = parse_jwks(document);
        for skip in &skipped {
            warn!(
                target: "idp_auth.keystore",
                kid = skip.kid.as_deref().unwrap_or("<none>"),
                reason = %skip.reason,
                "Skipping JWKS entry"
            );
        }

        if key_set.is_empty() {
            warn!(
                target: "idp_auth.keystore",
                skipped = skipped.len(),
                "JWKS contained no usable keys, keeping previous key set"
            );
            return Err(AuthError::KeyStoreRefreshFailed(
                "JWKS contained no usable RSA signing keys".into(),
            ));
        }

        let loaded = key_set.len();
        let new_set = Arc::new(key_set);
        {
            let mut keys = self.keys.write().await;
            *keys = new_set;
        }

        info!(
            target: "idp_auth.keystore",
            key_count = loaded,
            skipped = skipped.len(),
            "JWKS refreshed"
        );

        Ok(RefreshReport { loaded, skipped })
    }

    /// Look up a key without refreshing.
    pub async fn get(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.snapshot().await.get(kid)
    }

    /// Look up a key, refreshing once on a miss.
    ///
    /// Every miss triggers its own refresh; unknown kids are not remembered.
    ///
    /// # Errors
    ///
    /// Returns the refresh error if the miss-triggered refresh fails.
    #[instrument(skip_all, fields(kid = %kid))]
    pub async fn get_or_refresh(&self, kid: &str) -> Result<Option<Arc<SigningKey>>, AuthError> {
        if let Some(key) = self.get(kid).await {
            return Ok(Some(key));
        }

        debug!(target: "idp_auth.keystore", kid = %kid, "Key not cached, refreshing JWKS");
        self.refresh().await?;

        let key = self.get(kid).await;
        if key.is_none() {
            warn!(target: "idp_auth.keystore", kid = %kid, "Key not found in JWKS after refresh");
        }
        Ok(key)
    }

    /// Current key set.
    pub async fn snapshot(&self) -> Arc<KeySet> {
        Arc::clone(&*self.keys.read().await)
    }
}

/// Handle to the periodic JWKS refresh task.
///
/// Dropping the handle cancels the task; [`KeyRefreshTask::shutdown`] also
/// waits for it to finish.
#[derive(Debug)]
pub struct KeyRefreshTask {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl KeyRefreshTask {
    /// Spawn a task that refreshes `store` every `interval`, starting one
    /// interval from now. Refresh failures are logged and the previous key
    /// set is kept. The task exits when `cancel` fires.
    #[must_use]
    pub fn spawn(store: Arc<KeyStore>, interval: Duration, cancel: CancellationToken) -> Self {
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            refresh_loop(store, interval, task_cancel).await;
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Whether the task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel the task and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(target: "idp_auth.keystore", error = %e, "Key refresh task ended abnormally");
            }
        }
    }
}

impl Drop for KeyRefreshTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn refresh_loop(store: Arc<KeyStore>, period: Duration, cancel: CancellationToken) {
    info!(
        target: "idp_auth.keystore",
        interval_secs = period.as_secs(),
        "Key refresh task started"
    );

    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!(target: "idp_auth.keystore", "Key refresh task received shutdown signal, exiting");
                break;
            }
            _ = interval.tick() => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        info!(target: "idp_auth.keystore", "Key refresh task cancelled mid-refresh, exiting");
                        break;
                    }
                    result = store.refresh() => {
                        if let Err(e) = result {
                            warn!(
                                target: "idp_auth.keystore",
                                error = %e,
                                "Background JWKS refresh failed, keeping previous key set"
                            );
                        }
                    }
                }
            }
        }
    }
}
