//! HTTP surface over [`ConversionService`].
//!
//! [`router`] builds the axum application; [`serve`] binds the configured
//! address, serves until Ctrl-C or SIGTERM, then runs the service's shutdown
//! sweep.

mod error;
mod routes;

pub use error::ApiError;

use crate::error::ConvertError;
use crate::service::ConversionService;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// The application router, with the upload body limit and request tracing.
pub fn router(service: Arc<ConversionService>) -> Router {
    let limit = usize::try_from(service.config().max_upload_bytes).unwrap_or(usize::MAX);
    routes::router()
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Serve on `service.config().bind_addr` until a shutdown signal arrives.
pub async fn serve(service: Arc<ConversionService>) -> Result<(), ConvertError> {
    let addr = service.config().bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ConvertError::Internal(format!("Failed to bind {addr}: {e}")))?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, router(Arc::clone(&service)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ConvertError::Internal(format!("HTTP server error: {e}")))?;

    service.shutdown();
    info!("HTTP server stopped");
    Ok(())
}

/// Resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
