//! Secret types for values that must never reach logs.
//!
//! Re-exports [`secrecy`] types. Client secrets, access/refresh tokens and
//! service tokens are held as [`SecretString`] throughout this crate, so any
//! struct that derives `Debug` over them prints `[REDACTED]` instead of the
//! value. Reading the value requires an explicit `expose_secret()` call,
//! which keeps every place a secret leaves the process easy to audit
//! (form bodies sent to the identity provider, bearer headers).
//!
//! # Example
//!
//! ```rust
//! use idp_auth::secret::{ExposeSecret, SecretString};
//!
//! let client_secret = SecretString::from("s3cr3t");
//! assert!(!format!("{client_secret:?}").contains("s3cr3t"));
//! assert_eq!(client_secret.expose_secret(), "s3cr3t");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("client-secret-value");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("client-secret-value"));
    }

    #[test]
    fn test_deserialize_token_response_field() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct Grant {
            access_token: SecretString,
            expires_in: u64,
        }

        let json = r#"{"access_token": "eyJhbGciOi.payload.sig", "expires_in": 300}"#;
        let grant: Grant = serde_json::from_str(json).expect("deserialize");

        assert_eq!(grant.access_token.expose_secret(), "eyJhbGciOi.payload.sig");
        let debug = format!("{grant:?}");
        assert!(!debug.contains("eyJhbGciOi"));
    }
}
