//! MediaQuiz Server - REST API for crowd-sourced quiz images
//!
//! Exposes mediaquiz-core over HTTP:
//! - POST /upload/ - Stage images for an item
//! - POST /upload/save - Queue a save into the staging collection
//! - GET /verify/ - Next staged image to review
//! - POST /verify/confirm - Vote on a staged image

use std::net::SocketAddr;
use std::sync::Arc;

use mediaquiz_core::{HttpManifestFetcher, ItemCatalog, LogNotifier};
use mediaquiz_server::{background, create_router_with_config, Config, Services};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mediaquiz_server=info,mediaquiz_core=info,tower_http=info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let media = &config.media;

    let catalog = Arc::new(ItemCatalog::load(&media.catalog_dir)?);
    tracing::info!(
        items = catalog.items().len(),
        dir = %media.catalog_dir.display(),
        "Item catalog loaded"
    );

    let fetcher = Arc::new(HttpManifestFetcher::new(media.manifest_timeout)?);
    let services = Services::build(media, catalog, fetcher, Arc::new(LogNotifier));

    let schedules = if config.background_tasks_enabled {
        background::spawn_schedules(media, &services)
    } else {
        tracing::warn!("Background schedules: DISABLED");
        Vec::new()
    };

    let app = create_router_with_config(&config, services.state.clone());

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("API docs at http://{}/docs", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    for handle in schedules {
        handle.abort();
    }
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
