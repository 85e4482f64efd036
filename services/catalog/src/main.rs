use anyhow::{Context, Result};
use catalog_service::api::{start_api_server, AppState};
use catalog_service::{
    CatalogService, CatalogStore, CloudFrontSigner, Config, DownloadService, MessageCatalog,
    ObjectLocator, PgCatalogStore, S3ObjectStore, UrlSigner,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Scenario Catalog Service"
    );

    init_metrics(config.service.metrics_port)?;

    let pg_store = PgCatalogStore::new(&config.database)
        .await
        .context("Failed to initialize catalog store")?;

    if config.database.run_migrations {
        pg_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let store: Arc<dyn CatalogStore> = Arc::new(pg_store);

    let object_store = S3ObjectStore::new(&config.s3)
        .await
        .context("Failed to initialize S3 object store")?;
    let locator = ObjectLocator::new(Arc::new(object_store), &config.s3.bucket);

    let signer: Arc<dyn UrlSigner> = Arc::new(CloudFrontSigner::from_config(&config.cdn));
    let layout = Arc::new(config.layout.clone());

    let catalog = CatalogService::new(
        store.clone(),
        locator,
        signer.clone(),
        layout.clone(),
        config.cdn.clone(),
    );
    let downloads = DownloadService::new(store.clone(), signer, layout, config.cdn.clone());

    let api_state = AppState {
        catalog: Arc::new(catalog),
        downloads: Arc::new(downloads),
        store,
        messages: Arc::new(MessageCatalog::english()),
        user_header: config.api.user_header.clone(),
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Catalog service started successfully");

    shutdown_signal().await;

    info!("Shutting down catalog service");
    api_handle.abort();
    info!("Catalog service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
