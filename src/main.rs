//! Care Agents - HTTP Server Entry Point
//!
//! Loads configuration from the environment and starts the HTTP server that
//! exposes the pipeline and single-agent API.

use care_agents::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "care_agents=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={}, max_iterations={}",
        config.default_model, config.max_iterations
    );

    // Start HTTP server
    api::serve(config).await?;

    Ok(())
}
