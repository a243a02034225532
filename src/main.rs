//! edgecam - Trigger capture with durable local queue and upload sync
//!
//! Main entry point.

use edgecam::{
    capture_dispatcher::CaptureDispatcher,
    command_listener::CommandListener,
    edge_detector::EdgeDetector,
    local_queue::LocalQueue,
    snapshot_service::SnapshotService,
    state::{AppConfig, AppState},
    status_surface::StatusSurface,
    sync_engine::SyncEngine,
    uploader::{HttpProbe, HttpUploader},
    web_api,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Backup files older than this are deleted
const BACKUP_MAX_AGE_DAYS: u64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edgecam=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting edgecam v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    config.validate()?;
    tracing::info!(
        storage_dir = %config.storage_dir.display(),
        max_images = config.max_images,
        "Configuration loaded"
    );

    // Local queue
    let queue = Arc::new(LocalQueue::open(&config.storage_dir, config.max_images).await?);
    tracing::info!(images = queue.len().await, "LocalQueue initialized");

    // Capture
    let snapshot = Arc::new(SnapshotService::new(
        config.storage_dir.clone(),
        config.rtsp_streams(),
        config.capture_timeout_sec,
    ));
    let dispatcher = Arc::new(CaptureDispatcher::new(
        snapshot,
        queue.clone(),
        config.channels(),
    ));
    tracing::info!("CaptureDispatcher initialized");

    // Edge triggers
    let detector = Arc::new(
        EdgeDetector::from_system(config.gpio_enabled, config.gpio_pins())
            .with_debounce(Duration::from_millis(config.gpio_debounce_ms)),
    );
    for channel_id in config.channels() {
        detector
            .register_handler(&channel_id, dispatcher.handler())
            .await?;
    }
    detector.start_monitoring().await;
    tracing::info!(available = detector.is_available(), "EdgeDetector initialized");

    // Remote command triggers
    let listener = CommandListener::bind(
        &config.trigger_addr(),
        config.channels(),
        dispatcher.handler(),
    )
    .await?;
    listener.start().await;

    // Upload sync
    let uploader = Arc::new(HttpUploader::new(
        config.s3_api_url.clone(),
        config.max_retries,
        Duration::from_secs(config.retry_delay_sec),
    )?);
    let probe = Arc::new(HttpProbe::new(config.connectivity_url.clone())?);
    let sync = Arc::new(
        SyncEngine::new(queue.clone(), uploader, probe).with_interval(
            Duration::from_secs(config.sync_interval_sec),
            Duration::from_secs(config.sync_backoff_sec),
        ),
    );
    sync.start().await;

    let status = Arc::new(StatusSurface::new(
        queue.clone(),
        dispatcher,
        detector.clone(),
        sync.clone(),
    ));

    let state = AppState { status };

    // Start backup cleanup task (daily)
    let backup_cleanup = queue.clone();
    tokio::spawn(async move {
        let max_age = Duration::from_secs(BACKUP_MAX_AGE_DAYS * 24 * 3600);
        let mut interval = tokio::time::interval(Duration::from_secs(24 * 3600));
        loop {
            interval.tick().await;
            match backup_cleanup.cleanup_backup(max_age).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed = removed, "Backup cleanup finished")
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Failed to cleanup backup directory"),
            }
        }
    });

    let app = web_api::create_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr = config.http_addr();
    let http = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(http, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down services");
    listener.shutdown().await;
    detector.stop_monitoring().await;
    sync.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
