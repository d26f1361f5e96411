use anyhow::{Context, Result};
use chrono::Duration;
use guildvault::api::{
    create_admin_router, create_capture_router, AdminAppState, CaptureAppState,
};
use guildvault::config::{load_settings, Secrets, VaultSettings};
use guildvault::credentials::CredentialStore;
use guildvault::lifecycle::{run_renewal_sweep, run_sync_worker, LifecycleManager, SyncQueue};
use guildvault::membership::MembershipClient;
use guildvault::oauth::{run_login_state_cleanup, ExchangeClient, LoginStateManager};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Login states stay valid for ten minutes, pruned every minute.
const LOGIN_STATE_EXPIRY_SECONDS: i64 = 600;
const LOGIN_STATE_CLEANUP_SECONDS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guildvault=info".into()),
        )
        .init();

    info!("GuildVault starting...");

    // Tunables from TOML (optional), secrets from the environment
    let settings = match std::env::var("GUILDVAULT_CONFIG") {
        Ok(path) => load_settings(&path)?,
        Err(_) => VaultSettings::default(),
    };
    let secrets = Secrets::from_env()?;

    info!(
        bind_addr = %settings.server.bind_addr,
        db_path = %settings.storage.path,
        renewal_window_days = settings.renewal.window_days,
        sweep_interval_minutes = settings.renewal.sweep_interval_minutes,
        admin_api = secrets.admin_token.is_some(),
        "Configuration loaded"
    );

    // Credential store
    let store = Arc::new(
        CredentialStore::open(&settings.storage.path, &secrets.encryption_key)
            .context("Failed to initialize credential store")?,
    );
    info!("Credential store initialized");

    // Platform clients
    let exchanger = Arc::new(ExchangeClient::new(
        &settings.platform,
        secrets.client_id.clone(),
        secrets.client_secret.clone(),
        secrets.redirect_uri.clone(),
    ));
    let membership = Arc::new(MembershipClient::new(
        &settings.platform,
        secrets.bot_token.clone(),
    ));

    // Lifecycle manager
    let lifecycle = Arc::new(LifecycleManager::new(
        Arc::clone(&store),
        exchanger,
        membership,
        Duration::days(settings.renewal.window_days),
    ));

    // Background renewal worker + optional timed sweep
    let (queue, job_rx) = SyncQueue::new();
    let worker_handle = tokio::spawn(run_sync_worker(Arc::clone(&lifecycle), job_rx));

    let sweep_handle = if settings.renewal.sweep_interval_minutes > 0 {
        Some(tokio::spawn(run_renewal_sweep(
            queue.clone(),
            settings.renewal.sweep_interval_minutes,
        )))
    } else {
        info!("Renewal sweep disabled; batches run only via the admin API");
        None
    };

    // Login state manager + cleanup task
    let login_states = LoginStateManager::new(LOGIN_STATE_EXPIRY_SECONDS);
    let cleanup_handle = tokio::spawn(run_login_state_cleanup(
        login_states.clone(),
        LOGIN_STATE_CLEANUP_SECONDS,
    ));

    // HTTP API
    let capture_router = create_capture_router(CaptureAppState {
        lifecycle: Arc::clone(&lifecycle),
        login_states,
        authorize_endpoint: settings.platform.authorize_url.clone(),
        client_id: secrets.client_id.clone(),
        redirect_uri: secrets.redirect_uri.clone(),
    });
    let admin_router = create_admin_router(AdminAppState {
        store: Arc::clone(&store),
        lifecycle: Arc::clone(&lifecycle),
        queue: queue.clone(),
        admin_token: secrets.admin_token.clone(),
    });
    let router = capture_router.merge(admin_router);

    let listener = tokio::net::TcpListener::bind(&settings.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.server.bind_addr))?;
    info!(bind_addr = %settings.server.bind_addr, "GuildVault listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            tracing::error!(error = %e, "Server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    cleanup_handle.abort();
    if let Some(handle) = sweep_handle {
        handle.abort();
    }
    // The worker exits once every queue sender (ours, the aborted sweep's,
    // the aborted server's) has been dropped
    drop(queue);
    let _ = worker_handle.await;

    info!("GuildVault stopped");
    Ok(())
}
