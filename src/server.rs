use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tracing::info;

use crate::config::RouteConfig;
use crate::webhook::{self, Relay};

pub const HEALTHCHECK_PATH: &str = "/healthcheck";

/// Health check plus one POST route per configured bot.
pub fn router(relay: Arc<Relay>, routes: &[RouteConfig], max_body_bytes: usize) -> Router {
    let mut app = Router::new().route(HEALTHCHECK_PATH, get(|| async { StatusCode::OK }));
    for route in routes {
        info!("Registering webhook {} for bot {}", route.path, route.bot_name);
        app = app.route(
            &route.path,
            webhook::forward(relay.clone(), route.bot_name.clone(), max_body_bytes),
        );
    }
    app
}

pub async fn serve(addr: &str, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
