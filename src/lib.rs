pub mod api;
pub mod artifact;
pub mod build;
pub mod capture;
pub mod config;
mod error;
pub mod instance;
pub mod paths;
pub mod process;
pub mod state;
mod validation;

use std::sync::Arc;

use config::load_config;
pub use error::{AppError, ErrorKind, Result};
use state::AppState;

/// Serve the HTTP API until SIGINT/SIGTERM, then stop every preview.
pub async fn run() -> Result<()> {
    let config = load_config()?;
    let addr = format!("{}:{}", config.bind_addr, config.server_port);
    log::info!(
        "Preview ports {}-{}, build timeout {}ms, work dir {}",
        config.preview.base_port,
        config.preview.max_port,
        config.build.timeout_ms,
        config.work_dir().display()
    );

    let state = Arc::new(AppState::new(config));
    let app = api::router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        log::error!("Failed to bind {}: {}", addr, e);
        AppError::internal(format!("Failed to bind {addr}: {e}"))
    })?;
    log::info!("Listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    state.shutdown().await;
    served.map_err(|e| AppError::internal(format!("HTTP server error: {e}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    log::info!("Shutdown signal received");
}
