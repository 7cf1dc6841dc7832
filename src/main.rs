use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use document_manager::{
    config::Config,
    db::Database,
    routes,
    services::{DocumentService, StagingArea},
    storage::{
        factory::{create_storage_backend, storage_config_from_env},
        layout::StorageLayout,
    },
    AppState,
};

#[derive(Parser)]
#[command(name = "document-manager", version, about = "Stores documents and their attachments")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Check every record against the storage backend and report missing files
    Reconcile,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = init_logging(&config);

    let documents = build_service(&config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, documents).await,
        Command::Reconcile => reconcile(&documents).await,
    }
}

fn init_logging(config: &Config) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "document_manager=info,tower_http=info".into());

    let file_appender = tracing_appender::rolling::daily(&config.log_directory, "document-manager.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false) // no ANSI in files
                .with_writer(non_blocking),
        )
        .init();

    info!(log_directory = %config.log_directory, "Logging initialized");
    guard
}

async fn build_service(config: &Config) -> Result<Arc<DocumentService>> {
    let db = Database::new(&config.database_url).await?;
    db.migrate().await?;

    let storage_config = storage_config_from_env(config);
    let backend = create_storage_backend(
        storage_config,
        Duration::from_secs(config.backend_timeout_seconds),
    )
    .await?;

    let layout = StorageLayout::new(&config.parent_directory)?;
    Ok(Arc::new(DocumentService::new(backend, Arc::new(db), layout)))
}

async fn serve(config: Config, documents: Arc<DocumentService>) -> Result<()> {
    let staging = StagingArea::from_config(&config);
    staging.initialize().await?;

    let address = config.server_address.clone();
    let state = Arc::new(AppState {
        documents,
        staging: Arc::new(staging),
    });
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| anyhow!("Failed to bind {}: {}", address, e))?;
    info!("Server starting on {}", address);
    info!("API documentation at http://{}/swagger-ui", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn reconcile(documents: &DocumentService) -> Result<()> {
    let report = documents.reconcile().await?;
    if report.is_consistent() {
        info!("All {} records have their stored files", report.checked);
        return Ok(());
    }

    for record in &report.missing {
        warn!(
            id = %record.id,
            kind = %record.kind,
            stored_path = %record.stored_path,
            "Stored file missing"
        );
    }
    error!("{} of {} records are missing their stored files", report.missing.len(), report.checked);
    Err(anyhow!("{} records are inconsistent", report.missing.len()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
