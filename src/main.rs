mod config;
mod error;
mod ifttt;
mod line;
mod server;
mod token;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::ifttt::IftttClient;
use crate::line::LineClient;
use crate::token::TokenStore;
use crate::webhook::Relay;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,line_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    match &config_path {
        Some(path) => info!("Loading configuration from: {}", path.display()),
        None => info!("Loading configuration from config.toml and environment"),
    }
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  LINE API: {}", config.line.api_base_url);
    info!("  IFTTT event: {} ({})", config.ifttt.event, config.ifttt.payload_format);
    info!("  Skip empty display names: {}", config.relay.skip_empty_display_name);
    info!("  Routes: {}", config.routes.len());

    let http = config.relay.http_client()?;

    let line = Arc::new(LineClient::new(http.clone(), &config.line)?);
    let ifttt = IftttClient::new(http, &config.ifttt)?;

    // The server never starts without a token.
    let tokens = match TokenStore::initialize(line.clone(), config.relay.token_refresh_margin()).await {
        Ok(tokens) => Arc::new(tokens),
        Err(e) => {
            error!("Cannot fetch access token: {}", e);
            return Err(anyhow::Error::new(e).context("Cannot fetch access token"));
        }
    };

    let relay = Arc::new(Relay::new(
        line,
        tokens,
        ifttt,
        config.relay.skip_empty_display_name,
    ));
    let app = server::router(relay, &config.routes, config.server.max_body_bytes);

    server::serve(&config.server.bind_addr(), app).await
}
