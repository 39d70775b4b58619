use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Global metrics for the chat service
pub struct Metrics {
    pub registry: Registry,

    // Request metrics
    pub chat_requests_total: CounterVec,
    pub rate_limited_total: Counter,

    // Upstream metrics
    pub upstream_requests_total: CounterVec,
    pub upstream_duration_seconds: HistogramVec,
    pub tokens_used_total: CounterVec,

    // Rate limiter state
    pub tracked_clients: Gauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let chat_requests_total = CounterVec::new(
            Opts::new("portfolio_chat_requests_total", "Chat requests by response status"),
            &["status"],
        )?;

        let rate_limited_total = Counter::new(
            "portfolio_chat_rate_limited_total",
            "Chat requests rejected by the rate limiter",
        )?;

        let upstream_requests_total = CounterVec::new(
            Opts::new(
                "portfolio_chat_upstream_requests_total",
                "Completion calls by provider and outcome",
            ),
            &["provider", "status"],
        )?;

        let upstream_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "portfolio_chat_upstream_duration_seconds",
                "Completion call duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
            &["provider"],
        )?;

        let tokens_used_total = CounterVec::new(
            Opts::new("portfolio_chat_tokens_used_total", "Tokens used (input + output)"),
            &["provider", "model", "token_type"], // token_type: input, output
        )?;

        let tracked_clients = Gauge::new(
            "portfolio_chat_rate_limit_tracked_clients",
            "Client keys currently held by the rate limiter",
        )?;

        registry.register(Box::new(chat_requests_total.clone()))?;
        registry.register(Box::new(rate_limited_total.clone()))?;
        registry.register(Box::new(upstream_requests_total.clone()))?;
        registry.register(Box::new(upstream_duration_seconds.clone()))?;
        registry.register(Box::new(tokens_used_total.clone()))?;
        registry.register(Box::new(tracked_clients.clone()))?;

        Ok(Self {
            registry,
            chat_requests_total,
            rate_limited_total,
            upstream_requests_total,
            upstream_duration_seconds,
            tokens_used_total,
            tracked_clients,
        })
    }

    /// Render the registry in Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<Arc<Metrics>> =
    once_cell::sync::Lazy::new(|| Arc::new(Metrics::default()));
