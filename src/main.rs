use anyhow::{Context, Result};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use storage_gateway::{
    audit::TracingAuditSink,
    config,
    crypto::Cipher,
    providers::ProviderRegistry,
    routes,
    services::metadata_store::MetadataStore,
    state::AppState,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting storage-gateway with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");

    // Create parent directory if needed
    if !db_path.starts_with(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {:?}", parent))?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let store = MetadataStore::connect(db_url, 5)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;

    // --- Migrations (embedded, idempotent) ---
    store.migrate().await.context("running migrations")?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Crypto + providers ---
    let cipher = Cipher::from_config(cfg.cipher_key.as_deref());
    if let Some(err) = cipher.key_error() {
        tracing::warn!("cipher key unavailable ({}); ciphered buckets will refuse I/O", err);
    }
    let registry = Arc::new(ProviderRegistry::with_defaults(cipher.clone()));
    tracing::info!("Registered providers: {:?}", registry.providers());

    if cfg.admin_token.is_none() {
        tracing::warn!("GATEWAY_ADMIN_TOKEN is not set; admin API is unauthenticated");
    }

    // --- Services + router ---
    let state = AppState::build(
        store,
        registry,
        cipher,
        Arc::new(TracingAuditSink),
        cfg.reconcile_workers,
        cfg.admin_token.clone(),
    );
    let app = routes::routes::routes(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
