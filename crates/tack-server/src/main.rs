//! # Tack Server
//!
//! Realtime board rooms and due reminders.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a secret from the environment
//! TACK_JWT_SECRET=... tack
//!
//! # Override a nested setting
//! TACK__REALTIME__AUTHORIZE_JOIN=true tack
//! ```

use anyhow::Result;
use tack_server::{metrics, run_server, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tack=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    tracing::info!("Starting Tack server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    run_server(config).await?;

    Ok(())
}
