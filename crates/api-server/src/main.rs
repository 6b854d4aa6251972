//! API server binary entry point

use emoji_vision_api_server::{start_server, ApiState};
use emoji_vision_common::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "emoji_vision=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // A broken configuration fails startup
    let config = AppConfig::from_env()?;
    let addr = format!("0.0.0.0:{}", config.server.port);

    tracing::info!(
        "Starting emoji vision API server ({} analyzers)",
        config.analyzers.len()
    );
    let state = ApiState::new(config)?;
    start_server(&addr, state).await?;

    Ok(())
}
