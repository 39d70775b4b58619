use anyhow::Result;
use portfolio_chat::{config::Config, server};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("portfolio-chat v{}", portfolio_chat::VERSION);

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");
    info!("  HTTP: {}", config.server.bind);
    info!("  Model: {}", config.openai.model);
    info!(
        "  Rate limit: {} calls per {}s",
        config.rate_limiting.max_calls, config.rate_limiting.window_secs
    );

    server::run(config).await?;

    Ok(())
}
