//! # idp-auth test utilities
//!
//! Shared test utilities for the `idp-auth` crate.
//!
//! This crate provides:
//! - RSA signing key fixtures (pooled per test binary, keygen is slow)
//! - Test claim builders (`TestTokenBuilder`)
//! - A mock identity provider (`MockIdp`) built on `wiremock`
//! - Fixed test identifiers (realm, client id, key ids)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use idp_auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let idp = MockIdp::start(TEST_REALM).await;
//!     let key = TestSigningKey::new(0, TEST_KID);
//!     idp.mount_jwks(&[&key]).await;
//!
//!     let token = key.sign(
//!         &TestTokenBuilder::new()
//!             .issued_by(&idp.issuer())
//!             .for_audience(&[TEST_CLIENT_ID])
//!             .build(),
//!     );
//! }
//! ```

pub mod crypto_fixtures;
pub mod mock_idp;
pub mod test_ids;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use mock_idp::*;
pub use test_ids::*;
pub use token_builders::*;
