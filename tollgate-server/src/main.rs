use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tollgate_core::{Config, TokenCipher, crypto};
use tollgate_db::{SettingsRepository, TollgateDb, settings};
use tollgate_server::sidecar::{
    HttpSidecarManagement, LocalSidecarProcess, Supervisor, config_gen,
};
use tollgate_server::{AppState, jobs, lock, server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded (data dir: {})", config.settings.data_dir.display());

    // Refuse to run next to another instance; the store has one writer
    let _instance_lock = lock::acquire(&config.settings.data_dir)?;

    // Initialize database
    let db = TollgateDb::new(&config.settings.database_path).await?;
    info!("Database initialized");

    bootstrap_admin_password(&db, config.secrets.admin_password.as_deref()).await?;

    let cipher = TokenCipher::from_key_str(&config.secrets.encryption_key)?;
    let internal_key = config_gen::ensure_internal_key(db.pool()).await?;
    let server_config = config_gen::load_server_config(db.pool()).await?;

    // The management endpoint must stay on loopback; anything else
    // would let clients bypass the gateway's auth entirely
    let management_url = &config.settings.management_url;
    if !management_url.contains("127.0.0.1") && !management_url.contains("localhost") {
        warn!(
            "SIDECAR_MANAGEMENT_URL {} is not loopback; the sidecar must never be reachable from other interfaces",
            management_url
        );
    }

    // Sidecar supervision
    let management = Arc::new(HttpSidecarManagement::new(
        config.settings.management_url.clone(),
        Duration::from_secs(server_config.forward_timeout_seconds),
    ));
    let process = Arc::new(LocalSidecarProcess::new(
        config.settings.sidecar_binary.clone(),
    ));
    let supervisor = Arc::new(Supervisor::new(
        db.clone(),
        process,
        management,
        config.settings.sidecar_config_path(),
        config.settings.sidecar_state_dir(),
        config.settings.management_url.clone(),
    ));
    supervisor.spawn_watcher();

    if server_config.auto_start_proxy {
        match supervisor.start().await {
            Ok(()) => info!("Sidecar started"),
            Err(e) => warn!("Sidecar auto-start failed: {}", e),
        }
    }

    let state = Arc::new(AppState::new(
        db,
        cipher,
        Arc::clone(&supervisor),
        server_config.requests_per_minute,
        internal_key,
    ));

    jobs::spawn_background_jobs(Arc::clone(&state));

    // Catch up the rollup for yesterday before serving
    if let Err(e) = jobs::run_rollup(&state.db, server_config.usage_retention_days).await {
        warn!("Startup usage rollup failed: {}", e);
    }

    let bind_addr = config.bind_addr();
    info!("Starting tollgate on {}", bind_addr);
    server::run(state, &bind_addr).await
}

/// One-way bootstrap: hash ADMIN_PASSWORD into settings on first run;
/// ignore the variable once a digest exists.
async fn bootstrap_admin_password(
    db: &TollgateDb,
    admin_password: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = db.pool();

    if SettingsRepository::get(pool, settings::ADMIN_PASSWORD_HASH)
        .await?
        .is_some()
    {
        info!("Admin password already configured");
        return Ok(());
    }

    let password =
        admin_password.ok_or("ADMIN_PASSWORD environment variable required on first run")?;
    let digest = crypto::hash_password(password)?;
    SettingsRepository::set(pool, settings::ADMIN_PASSWORD_HASH, &digest).await?;
    info!("Admin password initialized from ADMIN_PASSWORD");

    Ok(())
}
