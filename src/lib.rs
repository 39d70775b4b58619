pub mod chat;
pub mod config;
pub mod error;
pub mod metrics;
pub mod persona;
pub mod providers;
pub mod rate_limit;
pub mod server;
pub mod types;

// Re-export commonly used types
pub use chat::ChatService;
pub use config::Config;
pub use error::{ChatError, UpstreamError};
pub use rate_limit::{InMemoryRateLimiter, RateDecision, RateLimitPolicy, RateLimitStore};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
