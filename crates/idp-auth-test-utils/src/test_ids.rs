//! Fixed identifiers for reproducible tests.

/// Realm used by the mock identity provider.
pub const TEST_REALM: &str = "acme";

/// Client id the provider under test is configured with.
pub const TEST_CLIENT_ID: &str = "svc";

/// Client secret the provider under test is configured with.
pub const TEST_CLIENT_SECRET: &str = "svc-secret-value";

/// Some other client that shares the realm.
pub const OTHER_CLIENT_ID: &str = "billing";

/// Key id of the primary signing key.
pub const TEST_KID: &str = "test-key-01";

/// Key id of the secondary signing key (rotation scenarios).
pub const ROTATED_KID: &str = "test-key-02";

/// Key id that is never published.
pub const UNKNOWN_KID: &str = "unpublished-key";

/// Subject carried by tokens built with default settings.
pub const TEST_SUBJECT: &str = "3f1c2a8e-5b7d-4e0f-9a61-2d8c7b4e1f90";
