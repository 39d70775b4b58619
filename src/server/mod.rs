pub mod http;

use crate::chat::{ChatService, ChatSettings};
use crate::config::Config;
use crate::providers::{openai::OpenAIProvider, CompletionProvider};
use crate::rate_limit::InMemoryRateLimiter;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Wire the chat service from configuration.
///
/// Returns the concrete limiter too so the caller can schedule idle eviction.
pub fn build_state(config: Config) -> Result<(http::AppState, Arc<InMemoryRateLimiter>)> {
    let limiter = Arc::new(InMemoryRateLimiter::new(config.rate_limiting.policy()));

    let provider: Option<Arc<dyn CompletionProvider>> = match OpenAIProvider::from_config(&config.openai)? {
        Some(provider) => Some(Arc::new(provider)),
        None => None,
    };

    let chat = ChatService::new(
        limiter.clone(),
        provider,
        config.persona.persona(),
        ChatSettings::from_config(&config),
    );

    let state = http::AppState {
        config: Arc::new(config),
        chat: Arc::new(chat),
    };

    Ok((state, limiter))
}

/// Run the HTTP server until Ctrl-C
pub async fn run(config: Config) -> Result<()> {
    let bind = config.server.bind.clone();
    let eviction = config
        .rate_limiting
        .idle_eviction_windows
        .map(|windows| (windows, Duration::from_secs(config.rate_limiting.eviction_interval_secs.max(1))));

    let (state, limiter) = build_state(config)?;

    if let Some((idle_windows, interval)) = eviction {
        info!("Evicting clients idle for {} windows every {:?}", idle_windows, interval);
        tokio::spawn(evict_idle_clients(limiter, idle_windows, interval));
    }

    let app = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("HTTP server listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn evict_idle_clients(limiter: Arc<InMemoryRateLimiter>, idle_windows: u32, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let removed = limiter.evict_idle(chrono::Utc::now().timestamp_millis(), idle_windows);
        crate::metrics::METRICS.tracked_clients.set(limiter.len() as f64);
        if removed > 0 {
            tracing::debug!("Evicted {} idle rate-limit clients", removed);
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
