use anyhow::{Context, Result};
use credvault::api::{
    create_project_router, create_signin_router, create_token_router, SignInAppState,
};
use credvault::auth::SessionTokens;
use credvault::config::CredvaultConfig;
use credvault::credentials::{
    run_store_cleanup, CipherBox, EncryptionKey, KeySource, SqliteTokenStore, TokenStore,
};
use credvault::manager::{run_failure_cleanup, CredentialManager, ManagerSettings};
use credvault::oauth::{run_state_cleanup, OAuthClient, StateManager, TokenRefresher};
use credvault::policy::ExpiryPolicy;
use credvault::project::{ProjectLinks, ProjectValidator, SimulatedProjectChecker};
use credvault::scheduler::{ProactiveScheduler, SchedulerSettings};
use credvault::session::SessionService;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credvault=info".into()),
        )
        .init();

    info!("Credvault starting...");

    let config = CredvaultConfig::load().context("Failed to load configuration")?;

    info!(
        bind_addr = %config.server.bind_addr,
        db_path = %config.storage.db_path,
        buffer_seconds = config.refresh.buffer_seconds,
        "Configuration loaded"
    );

    // Key material is fixed for the lifetime of the process
    let configured_key = std::env::var("CREDVAULT_ENCRYPTION_KEY").ok();
    let (key, source) = EncryptionKey::from_config(configured_key.as_deref())
        .context("CREDVAULT_ENCRYPTION_KEY must be a base64-encoded 32-byte key")?;
    if source == KeySource::Ephemeral {
        warn!(
            "CREDVAULT_ENCRYPTION_KEY not set, using an ephemeral key; \
             stored credentials will be unreadable after restart"
        );
    }
    let cipher = Arc::new(CipherBox::new(&key));

    let store: Arc<dyn TokenStore> = Arc::new(
        SqliteTokenStore::new(&config.storage.db_path)
            .context("Failed to initialize credential store")?,
    );
    info!("Credential store initialized");

    let provider = config.oauth.provider();
    let client = OAuthClient::new(provider, config.refresh.timeout())
        .context("Failed to build OAuth client")?;
    let sign_in_client = if client.provider().is_configured() {
        Some(client.clone())
    } else {
        warn!("GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET not set, sign-in disabled and refreshes will be rejected");
        None
    };

    let manager = Arc::new(CredentialManager::new(
        Arc::clone(&cipher),
        Arc::clone(&store),
        Arc::new(client) as Arc<dyn TokenRefresher>,
        ManagerSettings {
            policy: ExpiryPolicy::new(config.refresh.buffer_seconds),
            token_ttl: chrono::Duration::days(config.storage.token_ttl_days),
            refresh_timeout: config.refresh.timeout(),
        },
    ));

    let scheduler = ProactiveScheduler::new(
        Arc::clone(&manager),
        SchedulerSettings {
            min_rearm: Duration::from_secs(config.refresh.min_rearm_seconds),
            retry_delay: Duration::from_secs(config.refresh.retry_delay_seconds),
        },
    );

    let validator = ProjectValidator::new(
        Arc::new(SimulatedProjectChecker::new()),
        Duration::from_secs(config.project.check_timeout_seconds),
    );

    let links = ProjectLinks::new(
        Arc::clone(&cipher),
        Arc::clone(&store),
        chrono::Duration::days(config.storage.project_ttl_days),
    );

    let sessions = SessionTokens::new(
        Arc::clone(&cipher),
        Arc::clone(&store),
        chrono::Duration::days(config.storage.session_ttl_days),
    );

    let session = Arc::new(SessionService::new(
        Arc::clone(&manager),
        scheduler,
        validator,
        links,
        sessions,
    ));

    // Background cleanup
    let state_manager = StateManager::new(config.oauth.state_expiry_seconds);
    let store_cleanup = tokio::spawn(run_store_cleanup(
        Arc::clone(&store),
        config.storage.cleanup_interval_seconds,
    ));
    let state_cleanup = tokio::spawn(run_state_cleanup(state_manager.clone(), 60));
    let failure_cleanup = tokio::spawn(run_failure_cleanup(
        manager,
        config.storage.cleanup_interval_seconds,
    ));

    let router = create_token_router(Arc::clone(&session))
        .merge(create_project_router(Arc::clone(&session)))
        .merge(create_signin_router(SignInAppState {
            session: Arc::clone(&session),
            client: sign_in_client,
            state_manager,
            callback_base_url: config.server.callback_base_url.clone(),
        }))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(bind_addr = %config.server.bind_addr, "Credvault API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Credvault API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    store_cleanup.abort();
    state_cleanup.abort();
    failure_cleanup.abort();
    session.shutdown();
    info!("Credvault stopped");

    Ok(())
}
