//! idp-probe
//!
//! Operator tool that checks a service's identity provider setup using the
//! same `IDP_*` environment variables the service reads:
//! starts a provider (fetching the realm's keys), checks the discovery
//! endpoint, optionally verifies a token and fetches a service token.
//!
//! Usage: `idp-probe [ACCESS_TOKEN]` (or `IDP_PROBE_TOKEN`).
//! Set `IDP_PROBE_SERVICE_TOKEN=true` to also run the client-credentials
//! grant, and `IDP_PROBE_LOG_FORMAT=json` for JSON logs.

use idp_auth::{AuthProvider, AuthProviderConfig};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let json_logs = std::env::var("IDP_PROBE_LOG_FORMAT").is_ok_and(|v| v == "json");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "idp_probe=info,idp_auth=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = AuthProviderConfig::from_env().map_err(|e| {
        error!(target: "idp_probe", error = %e, "Failed to load configuration");
        e
    })?;

    info!(
        target: "idp_probe",
        base_url = %config.base_url,
        realm = %config.realm,
        client_id = %config.client_id,
        "Configuration loaded"
    );

    let (provider, refresh_task) = AuthProvider::start(config).await.map_err(|e| {
        error!(target: "idp_probe", error = %e, "Failed to start authentication provider");
        e
    })?;

    let keys = provider.key_store().snapshot().await;
    info!(target: "idp_probe", kids = ?keys.kids(), "Signing keys loaded");

    let mut failed = false;

    match provider.health().await {
        Ok(()) => info!(target: "idp_probe", "Discovery endpoint healthy"),
        Err(e) => {
            error!(target: "idp_probe", error = %e, "Discovery endpoint unhealthy");
            failed = true;
        }
    }

    let token = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("IDP_PROBE_TOKEN").ok());
    if let Some(token) = token {
        match provider.verify_token(token.trim()).await {
            Ok(claims) => info!(
                target: "idp_probe",
                preferred_username = ?claims.preferred_username,
                realm_roles = ?claims.realm_roles,
                expires_at = ?claims.expires_at,
                "Token verified"
            ),
            Err(e) => {
                warn!(target: "idp_probe", error = %e, kind = ?e.kind(), "Token rejected");
                failed = true;
            }
        }
    }

    if std::env::var("IDP_PROBE_SERVICE_TOKEN").is_ok_and(|v| v == "true") {
        match provider.get_service_token().await {
            Ok(_) => info!(target: "idp_probe", "Service token issued"),
            Err(e) => {
                error!(target: "idp_probe", error = %e, "Service token request failed");
                failed = true;
            }
        }
    }

    provider.shutdown();
    refresh_task.shutdown().await;

    if failed {
        return Err("one or more probes failed".into());
    }

    info!(target: "idp_probe", "All probes passed");
    Ok(())
}
