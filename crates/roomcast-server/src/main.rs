//! # Roomcast Server
//!
//! Room-scoped realtime chat message-distribution server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! roomcast
//!
//! # Run with environment variables
//! ROOMCAST_PORT=8080 ROOMCAST_HOST=0.0.0.0 ROOMCAST_JWT_SECRET=s3cret roomcast
//! ```

mod auth;
mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomcast=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!(
        "Starting Roomcast server on {}:{}",
        config.host,
        config.port
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
