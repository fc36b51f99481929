//! HTTP surface of hymie.
//!
//! Users reach the start page, register, recover their access link and walk
//! the workflow through `/view`. Administrators list users, inspect their
//! history and follow the admin buttons of the current state.

pub mod auth;
pub mod csrf;
pub mod error;
pub mod extract;
pub mod render;
pub mod routes;
pub mod state;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use error::ServerError;
pub use routes::router;
pub use state::AppState;

/// Serves the app until Ctrl+C or SIGTERM.
pub async fn serve(state: AppState, bind_address: &str) -> Result<()> {
    let listener = TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("could not bind to {bind_address}"))?;
    info!(address = %listener.local_addr()?, "hymie is listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "could not listen for SIGTERM");
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
    info!("shutdown signal received");
}
