//! RSA signing key fixtures for testing.
//!
//! Generating 2048-bit RSA keys is expensive, so private keys are generated
//! once per test binary and pooled by slot. The same slot always yields the
//! same key within a process, which keeps multi-key scenarios (rotation,
//! wrong-key signatures) cheap.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::OnceLock;

/// Key size used for fixtures. Verifiers reject RSA keys below 2048 bits.
pub const TEST_KEY_BITS: usize = 2048;

/// Number of distinct pooled keys available.
pub const KEY_POOL_SIZE: usize = 3;

static KEY_POOL: [OnceLock<RsaPrivateKey>; KEY_POOL_SIZE] =
    [OnceLock::new(), OnceLock::new(), OnceLock::new()];

fn pooled_private_key(slot: usize) -> &'static RsaPrivateKey {
    let cell = KEY_POOL
        .get(slot)
        .unwrap_or_else(|| panic!("key slot {slot} out of range (pool size {KEY_POOL_SIZE})"));
    cell.get_or_init(|| RsaPrivateKey::new(&mut OsRng, TEST_KEY_BITS).expect("RSA key generation"))
}

/// An RSA signing key with its published identifier.
///
/// # Example
/// ```rust,ignore
/// let key = TestSigningKey::new(0, "test-key-01");
/// let jwks = serde_json::json!({ "keys": [key.jwk_json()] });
/// let token = key.sign(&claims);
/// ```
pub struct TestSigningKey {
    kid: String,
    encoding: EncodingKey,
    public: RsaPublicKey,
}

impl TestSigningKey {
    /// Build a signing key from pool `slot`, published under `kid`.
    pub fn new(slot: usize, kid: &str) -> Self {
        let private_key = pooled_private_key(slot);
        let private_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .expect("private pem");
        let encoding = EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("encoding key");

        Self {
            kid: kid.to_string(),
            encoding,
            public: private_key.to_public_key(),
        }
    }

    /// The key id this key is published under.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The RSA public key, for comparison against decoded JWKS entries.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Base64url (unpadded) encoding of the modulus.
    pub fn modulus_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.public.n().to_bytes_be())
    }

    /// Base64url (unpadded) encoding of the public exponent.
    pub fn exponent_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.public.e().to_bytes_be())
    }

    /// JWKS entry for this key, as published by a Keycloak-style provider.
    pub fn jwk_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kid": self.kid,
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "n": self.modulus_b64(),
            "e": self.exponent_b64(),
        })
    }

    /// Sign `claims` with RS256 and this key's `kid`.
    pub fn sign(&self, claims: &serde_json::Value) -> String {
        self.sign_with(Algorithm::RS256, Some(&self.kid), claims)
    }

    /// Sign `claims` with an explicit algorithm and header `kid`.
    ///
    /// Passing `None` for `kid` produces a token without a key id header.
    pub fn sign_with(
        &self,
        alg: Algorithm,
        kid: Option<&str>,
        claims: &serde_json::Value,
    ) -> String {
        let mut header = Header::new(alg);
        header.typ = Some("JWT".to_string());
        header.kid = kid.map(ToString::to_string);
        encode(&header, claims, &self.encoding).expect("sign token")
    }
}

/// Sign `claims` with HS256 using a shared secret.
///
/// Used to exercise algorithm-confusion rejection: a verifier must never
/// accept a symmetric signature for an RSA-published `kid`.
pub fn sign_hs256(secret: &[u8], kid: &str, claims: &serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    encode(&header, claims, &EncodingKey::from_secret(secret)).expect("sign token")
}

/// Build an unsigned token with an arbitrary header, for header-parsing tests.
pub fn unsigned_token(header: &serde_json::Value, claims: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(header.to_string().as_bytes());
    let claims_b64 = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("{header_b64}.{claims_b64}.c2lnbmF0dXJl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_slot_yields_same_key() {
        let first = TestSigningKey::new(0, "a");
        let second = TestSigningKey::new(0, "b");

        assert_eq!(first.public_key(), second.public_key());
        assert_eq!(first.modulus_b64(), second.modulus_b64());
    }

    #[test]
    fn test_different_slots_produce_different_keys() {
        let first = TestSigningKey::new(0, "a");
        let second = TestSigningKey::new(1, "b");

        assert_ne!(first.modulus_b64(), second.modulus_b64());
    }

    #[test]
    fn test_jwk_json_shape() {
        let key = TestSigningKey::new(0, "test-key-01");
        let jwk = key.jwk_json();

        assert_eq!(jwk["kid"], "test-key-01");
        assert_eq!(jwk["kty"], "RSA");
        assert_eq!(jwk["e"], "AQAB");
        assert!(!jwk["n"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_unsigned_token_has_three_parts() {
        let token = unsigned_token(
            &serde_json::json!({"alg": "RS256"}),
            &serde_json::json!({"sub": "x"}),
        );
        assert_eq!(token.split('.').count(), 3);
    }
}
