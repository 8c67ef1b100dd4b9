//! Provider facade integration tests.
//!
//! Covers the remote operations (userinfo, introspection, refresh grant,
//! service token, logout, health), their status-code mapping, startup
//! failures and shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use idp_auth::{
    AuthError, AuthErrorKind, AuthProvider, AuthProviderConfig, EndpointKind, ExposeSecret,
    KeyRefreshTask, SecretString,
};
use idp_auth_test_utils::{
    MockIdp, TestSigningKey, TestTokenBuilder, TEST_CLIENT_ID, TEST_CLIENT_SECRET, TEST_KID,
    TEST_REALM,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, ResponseTemplate};

fn config_for(idp: &MockIdp) -> AuthProviderConfig {
    AuthProviderConfig::new(
        idp.base_url(),
        TEST_REALM,
        TEST_CLIENT_ID,
        SecretString::from(TEST_CLIENT_SECRET),
    )
    .with_retry(2, Duration::from_millis(10))
}

/// Start a mock IdP with one published key and a provider against it.
async fn setup() -> Result<(MockIdp, AuthProvider, KeyRefreshTask), anyhow::Error> {
    let idp = MockIdp::start(TEST_REALM).await;
    let key = TestSigningKey::new(0, TEST_KID);
    idp.mount_jwks(&[&key]).await;
    let (provider, task) = AuthProvider::start(config_for(&idp)).await?;
    Ok((idp, provider, task))
}

// ----------------------------------------------------------------------------
// Startup
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_start_rejects_invalid_config() {
    let config = AuthProviderConfig::new(
        "not a url",
        TEST_REALM,
        TEST_CLIENT_ID,
        SecretString::from(TEST_CLIENT_SECRET),
    );

    let result = AuthProvider::start(config).await;

    assert!(matches!(result, Err(AuthError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_start_fails_when_jwks_unavailable() {
    let idp = MockIdp::start(TEST_REALM).await;
    Mock::given(method("GET"))
        .and(path(idp.certs_path()))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(idp.server())
        .await;

    let result = AuthProvider::start(config_for(&idp)).await;

    assert!(matches!(
        result,
        Err(AuthError::ServiceUnavailable {
            endpoint: EndpointKind::Certs,
            attempts: 2,
            ..
        })
    ));
}

#[tokio::test]
async fn test_start_fails_without_usable_keys() {
    let idp = MockIdp::start(TEST_REALM).await;
    Mock::given(method("GET"))
        .and(path(idp.certs_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keys": [{"kid": "enc", "kty": "RSA", "use": "enc", "n": "AQAB", "e": "AQAB"}]
        })))
        .mount(idp.server())
        .await;

    let result = AuthProvider::start(config_for(&idp)).await;

    assert!(matches!(result, Err(AuthError::KeyStoreRefreshFailed(_))));
}

#[tokio::test]
async fn test_transport_backoff_timing_on_startup() -> Result<(), anyhow::Error> {
    let idp = MockIdp::start(TEST_REALM).await;
    let key = TestSigningKey::new(0, TEST_KID);
    Mock::given(method("GET"))
        .and(path(idp.certs_path()))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(idp.server())
        .await;
    idp.mount_jwks(&[&key]).await;

    let started = Instant::now();
    let (_provider, task) =
        AuthProvider::start(config_for(&idp).with_retry(3, Duration::from_millis(100))).await?;

    // 100ms + 200ms of backoff before the third attempt
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(idp.request_count(&idp.certs_path()).await, 3);

    task.shutdown().await;
    Ok(())
}

// ----------------------------------------------------------------------------
// UserInfo
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_get_user_info() -> Result<(), anyhow::Error> {
    let (idp, provider, task) = setup().await?;
    Mock::given(method("GET"))
        .and(path(idp.userinfo_path()))
        .and(header("authorization", "Bearer user-access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "user-1",
            "email": "ada@example.com",
            "email_verified": true,
            "preferred_username": "ada",
            "locale": "en"
        })))
        .expect(1)
        .mount(idp.server())
        .await;

    let info = provider.get_user_info("user-access-token").await?;

    assert_eq!(info.sub, "user-1");
    assert_eq!(info.email_verified, Some(true));
    assert_eq!(info.preferred_username.as_deref(), Some("ada"));
    assert!(info.extra.contains_key("locale"));

    task.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_get_user_info_status_mapping() -> Result<(), anyhow::Error> {
    let (idp, provider, task) = setup().await?;
    Mock::given(method("GET"))
        .and(path(idp.userinfo_path()))
        .and(header("authorization", "Bearer expired"))
        .respond_with(ResponseTemplate::new(401))
        .mount(idp.server())
        .await;
    Mock::given(method("GET"))
        .and(path(idp.userinfo_path()))
        .and(header("authorization", "Bearer wrong-scope"))
        .respond_with(ResponseTemplate::new(403))
        .mount(idp.server())
        .await;
    Mock::given(method("GET"))
        .and(path(idp.userinfo_path()))
        .and(header("authorization", "Bearer broken"))
        .respond_with(ResponseTemplate::new(502))
        .mount(idp.server())
        .await;

    assert!(matches!(
        provider.get_user_info("expired").await,
        Err(AuthError::TokenRejected {
            endpoint: EndpointKind::UserInfo,
            status: 401
        })
    ));
    assert!(matches!(
        provider.get_user_info("wrong-scope").await,
        Err(AuthError::TokenRejected { status: 403, .. })
    ));
    let err = provider
        .get_user_info("broken")
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected error"))?;
    assert_eq!(err.kind(), AuthErrorKind::ServiceUnavailable);

    task.shutdown().await;
    Ok(())
}

// ----------------------------------------------------------------------------
// Introspection
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_introspect_token() -> Result<(), anyhow::Error> {
    let (idp, provider, task) = setup().await?;
    Mock::given(method("POST"))
        .and(path(idp.introspect_path()))
        .and(body_string_contains("token=opaque-token"))
        .and(body_string_contains("client_id=svc"))
        .and(body_string_contains("client_secret=svc-secret-value"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "scope": "openid",
            "client_id": "svc",
            "username": "ada",
            "exp": 1_900_000_000,
            "aud": "svc"
        })))
        .expect(1)
        .mount(idp.server())
        .await;

    let result = provider.introspect_token("opaque-token").await?;

    assert!(result.active);
    assert_eq!(result.username.as_deref(), Some("ada"));
    assert_eq!(result.exp, Some(1_900_000_000));
    assert!(result.extra.contains_key("aud"));

    task.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_introspect_failures() -> Result<(), anyhow::Error> {
    let (idp, provider, task) = setup().await?;
    Mock::given(method("POST"))
        .and(path(idp.introspect_path()))
        .and(body_string_contains("token=rejected"))
        .respond_with(ResponseTemplate::new(401))
        .mount(idp.server())
        .await;
    Mock::given(method("POST"))
        .and(path(idp.introspect_path()))
        .and(body_string_contains("token=garbled"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(idp.server())
        .await;

    let rejected = provider.introspect_token("rejected").await;
    assert!(matches!(rejected, Err(AuthError::TokenIntrospectionFailed(msg)) if msg.contains("401")));

    let garbled = provider.introspect_token("garbled").await;
    assert!(matches!(garbled, Err(AuthError::TokenIntrospectionFailed(_))));

    task.shutdown().await;
    Ok(())
}

// ----------------------------------------------------------------------------
// Refresh grant
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_refresh_token() -> Result<(), anyhow::Error> {
    let (idp, provider, task) = setup().await?;
    Mock::given(method("POST"))
        .and(path(idp.token_path()))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=old-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-access",
            "refresh_token": "new-refresh",
            "expires_in": 300,
            "refresh_expires_in": 1800,
            "token_type": "Bearer",
            "scope": "openid"
        })))
        .expect(1)
        .mount(idp.server())
        .await;

    let set = provider.refresh_token("old-refresh").await?;

    assert_eq!(set.access_token.expose_secret(), "new-access");
    assert_eq!(
        set.refresh_token.as_ref().map(|t| t.expose_secret()),
        Some("new-refresh")
    );
    assert_eq!(set.expires_in, 300);
    assert!(!format!("{set:?}").contains("new-access"));

    task.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_refresh_token_status_mapping() -> Result<(), anyhow::Error> {
    let (idp, provider, task) = setup().await?;
    Mock::given(method("POST"))
        .and(path(idp.token_path()))
        .and(body_string_contains("refresh_token=revoked"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
        )
        .mount(idp.server())
        .await;
    Mock::given(method("POST"))
        .and(path(idp.token_path()))
        .and(body_string_contains("refresh_token=during-outage"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(idp.server())
        .await;

    assert!(matches!(
        provider.refresh_token("revoked").await,
        Err(AuthError::TokenRejected {
            endpoint: EndpointKind::Token,
            status: 400
        })
    ));
    assert!(matches!(
        provider.refresh_token("during-outage").await,
        Err(AuthError::ServiceUnavailable {
            endpoint: EndpointKind::Token,
            attempts: 2,
            ..
        })
    ));

    task.shutdown().await;
    Ok(())
}

// ----------------------------------------------------------------------------
// Service token
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_service_token_calls_issue_once() -> Result<(), anyhow::Error> {
    let (idp, provider, task) = setup().await?;
    Mock::given(method("POST"))
        .and(path(idp.token_path()))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "svc-token", "expires_in": 300}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .named("client credentials grant")
        .mount(idp.server())
        .await;

    let (first, second) = tokio::join!(provider.get_service_token(), provider.get_service_token());
    assert_eq!(first?.expose_secret(), "svc-token");
    assert_eq!(second?.expose_secret(), "svc-token");

    // Cached afterwards.
    assert_eq!(provider.get_service_token().await?.expose_secret(), "svc-token");
    assert_eq!(idp.request_count(&idp.token_path()).await, 1);

    task.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_service_token_rejected_grant_is_internal() -> Result<(), anyhow::Error> {
    let (idp, provider, task) = setup().await?;
    Mock::given(method("POST"))
        .and(path(idp.token_path()))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": "unauthorized_client"})),
        )
        .mount(idp.server())
        .await;

    let result = provider.get_service_token().await;

    assert!(matches!(result, Err(AuthError::Internal(_))));
    task.shutdown().await;
    Ok(())
}

// ----------------------------------------------------------------------------
// Logout
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_logout() -> Result<(), anyhow::Error> {
    let (idp, provider, task) = setup().await?;
    Mock::given(method("POST"))
        .and(path(idp.logout_path()))
        .and(body_string_contains("refresh_token=session-a"))
        .and(body_string_contains("client_secret=svc-secret-value"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(idp.server())
        .await;
    Mock::given(method("POST"))
        .and(path(idp.logout_path()))
        .and(body_string_contains("refresh_token=session-b"))
        .respond_with(ResponseTemplate::new(200))
        .mount(idp.server())
        .await;
    Mock::given(method("POST"))
        .and(path(idp.logout_path()))
        .and(body_string_contains("refresh_token=session-c"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(idp.server())
        .await;
    Mock::given(method("POST"))
        .and(path(idp.logout_path()))
        .and(body_string_contains("refresh_token=stale"))
        .respond_with(ResponseTemplate::new(400))
        .mount(idp.server())
        .await;

    provider.logout("session-a").await?;
    provider.logout("session-b").await?;
    provider.logout("session-c").await?;
    assert!(matches!(
        provider.logout("stale").await,
        Err(AuthError::TokenRejected {
            endpoint: EndpointKind::Logout,
            status: 400
        })
    ));

    task.shutdown().await;
    Ok(())
}

// ----------------------------------------------------------------------------
// Health
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_health_ok_on_200() -> Result<(), anyhow::Error> {
    let (idp, provider, task) = setup().await?;
    idp.mount_discovery().await;

    provider.health().await?;

    task.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_health_fails_on_other_status() -> Result<(), anyhow::Error> {
    let (idp, provider, task) = setup().await?;
    Mock::given(method("GET"))
        .and(path(idp.discovery_path()))
        .respond_with(ResponseTemplate::new(204))
        .up_to_n_times(1)
        .mount(idp.server())
        .await;
    Mock::given(method("GET"))
        .and(path(idp.discovery_path()))
        .respond_with(ResponseTemplate::new(503))
        .mount(idp.server())
        .await;

    // 2xx but not 200 is still unhealthy.
    let err = provider
        .health()
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("204 must not be healthy"))?;
    assert_eq!(err.kind(), AuthErrorKind::ServiceUnavailable);

    let result = provider.health().await;
    assert!(matches!(
        result,
        Err(AuthError::ServiceUnavailable {
            endpoint: EndpointKind::Discovery,
            ..
        })
    ));

    task.shutdown().await;
    Ok(())
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_cancels_requests_and_stops_refresh() -> Result<(), anyhow::Error> {
    let idp = MockIdp::start(TEST_REALM).await;
    let key = TestSigningKey::new(0, TEST_KID);
    idp.mount_jwks(&[&key]).await;
    let (provider, task) = AuthProvider::start(
        config_for(&idp).with_key_refresh_interval(Duration::from_millis(20)),
    )
    .await?;

    provider.shutdown();
    assert!(provider.is_shut_down());
    task.shutdown().await;

    let fetches = idp.request_count(&idp.certs_path()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(idp.request_count(&idp.certs_path()).await, fetches);

    assert!(matches!(
        provider.get_service_token().await,
        Err(AuthError::Cancelled {
            endpoint: EndpointKind::Token
        })
    ));

    // Local verification with already-loaded keys keeps working.
    let token = key.sign(&TestTokenBuilder::new().issued_by(&idp.issuer()).build());
    provider.verify_token(&token).await?;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_interrupts_retry_wait() -> Result<(), anyhow::Error> {
    let idp = MockIdp::start(TEST_REALM).await;
    let key = TestSigningKey::new(0, TEST_KID);
    idp.mount_jwks(&[&key]).await;
    Mock::given(method("GET"))
        .and(path(idp.discovery_path()))
        .respond_with(ResponseTemplate::new(500))
        .mount(idp.server())
        .await;
    let (provider, task) =
        AuthProvider::start(config_for(&idp).with_retry(3, Duration::from_secs(30))).await?;

    let provider = Arc::new(provider);
    let background = Arc::clone(&provider);
    let started = Instant::now();
    let health = tokio::spawn(async move { background.health().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    provider.shutdown();

    let result = health.await?;
    assert!(matches!(
        result,
        Err(AuthError::Cancelled {
            endpoint: EndpointKind::Discovery
        })
    ));
    assert!(started.elapsed() < Duration::from_secs(5));

    task.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_dropping_refresh_task_leaves_provider_usable() -> Result<(), anyhow::Error> {
    let (idp, provider, task) = setup().await?;
    idp.mount_discovery().await;

    drop(task);

    assert!(!provider.is_shut_down());
    provider.health().await?;
    Ok(())
}

#[tokio::test]
async fn test_independent_providers_coexist() -> Result<(), anyhow::Error> {
    let first_idp = MockIdp::start("first").await;
    let second_idp = MockIdp::start("second").await;
    let first_key = TestSigningKey::new(0, TEST_KID);
    let second_key = TestSigningKey::new(1, TEST_KID);
    first_idp.mount_jwks(&[&first_key]).await;
    second_idp.mount_jwks(&[&second_key]).await;

    let config = |idp: &MockIdp, realm: &str| {
        AuthProviderConfig::new(
            idp.base_url(),
            realm,
            TEST_CLIENT_ID,
            SecretString::from(TEST_CLIENT_SECRET),
        )
        .with_retry(1, Duration::from_millis(1))
    };
    let (first, first_task) = AuthProvider::start(config(&first_idp, "first")).await?;
    let (second, second_task) = AuthProvider::start(config(&second_idp, "second")).await?;

    let first_token =
        first_key.sign(&TestTokenBuilder::new().issued_by(&first_idp.issuer()).build());
    let second_token =
        second_key.sign(&TestTokenBuilder::new().issued_by(&second_idp.issuer()).build());

    first.verify_token(&first_token).await?;
    second.verify_token(&second_token).await?;
    // Same kid, different key material and issuer.
    assert!(first.verify_token(&second_token).await.is_err());

    first.shutdown();
    assert!(!second.is_shut_down());

    first_task.shutdown().await;
    second_task.shutdown().await;
    Ok(())
}
