mod api;
mod metrics;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courier_core::{
    load_config, validate_config, BlobStore, DeliveryScheduler, DocumentSender, DocumentStore,
    FiscalNumberStore, FsBlobStore, SqliteDocumentStore, SqliteFiscalNumberStore,
    StrategyRegistry, SunatSender,
};

use api::create_router;
use state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("COURIER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Storage root: {:?}", config.storage.root);

    // Create SQLite stores
    let number_store: Arc<dyn FiscalNumberStore> = Arc::new(
        SqliteFiscalNumberStore::new(&config.database.path)
            .context("Failed to create fiscal number store")?,
    );
    let document_store: Arc<dyn DocumentStore> = Arc::new(
        SqliteDocumentStore::new(&config.database.path)
            .context("Failed to create document store")?,
    );
    info!("Stores initialized");

    // Resolve numbering strategies once; a bad identifier stops startup
    let numbering = StrategyRegistry::from_config(&config.numbering, number_store)
        .context("Invalid numbering configuration")?;
    info!("Numbering strategies resolved: {:?}", numbering);

    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.storage.root.clone()));

    let sender: Arc<dyn DocumentSender> = Arc::new(
        SunatSender::new(Duration::from_secs(config.sender.timeout_secs as u64))
            .context("Failed to create tax authority client")?,
    );

    let scheduler = Arc::new(DeliveryScheduler::new(
        config.scheduler.clone(),
        document_store,
        blobs,
        sender,
        config.sender.clone(),
    ));
    scheduler.start().await;

    // Create app state and router
    let state = Arc::new(AppState::new(config.clone(), Arc::clone(&scheduler)));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // In-flight deliveries finish before the scheduler returns
    if scheduler.is_running() {
        info!("Stopping scheduler...");
        scheduler.stop().await;
    }

    info!("Server shut down");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
