// Work order label service: renders 4x6 labels and sends them to PrintNode.

use actix_web::{middleware, web, App, HttpServer};
use tracing::{error, info, warn};

use workorder_labels::config::Config;
use workorder_labels::{routes, AppState};

// ============================================================================
// Shutdown Handling
// ============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

async fn cleanup_resources(state: AppState) {
    info!("Beginning resource cleanup");

    if let Err(e) = state.renderer().close().await {
        warn!("Rendering engine did not close cleanly: {}", e);
    }

    info!("Resource cleanup complete");
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // ========================================
    // Phase 1: Basic Initialization
    // ========================================

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to read .env file: {}", e);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting work order label service");

    // ========================================
    // Phase 2: Configuration & State Setup
    // ========================================

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to load configuration: {}", e),
        )
    })?;

    let socket_addr = config.socket_addr().map_err(|e| {
        error!("Invalid bind address: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    info!("Configuration loaded successfully");
    info!("Server will bind to: {}", socket_addr);

    let app_state = AppState::new(&config).map_err(|e| {
        error!("Application initialization error: {}", e);
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to initialize application: {}", e),
        )
    })?;

    // ========================================
    // Phase 3: HTTP Server Setup
    // ========================================

    let app_state_for_server = app_state.clone();

    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(web::Data::new(app_state_for_server.clone()))
            .configure(routes::configure)
    })
    .bind(socket_addr)?
    .shutdown_timeout(5)
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(async move { server.await });

    info!("Label service started on {}", socket_addr);
    info!("Health check: http://{}/api/health", socket_addr);

    // ========================================
    // Phase 4: Run Until Shutdown
    // ========================================

    shutdown_signal().await;

    // ========================================
    // Phase 5: Graceful Shutdown
    // ========================================

    info!("Initiating graceful shutdown...");

    server_handle.stop(true).await;

    cleanup_resources(app_state).await;

    server_task.await.map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Server task error: {}", e),
        )
    })??;

    info!("Graceful shutdown complete");
    Ok(())
}
