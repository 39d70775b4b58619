use axum::http::HeaderMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::{ChatError, UpstreamError};
use crate::metrics::METRICS;
use crate::persona::Persona;
use crate::providers::CompletionProvider;
use crate::rate_limit::RateLimitStore;
use crate::types::{ChatApiResponse, ChatMessage, ChatRequest, ChatResponse};

/// Key used when a request carries no client address headers
pub const UNKNOWN_CLIENT: &str = "unknown";

pub const MISSING_MESSAGE: &str = "Message is required";
pub const MISSING_CREDENTIAL: &str = "OpenAI API key is not configured.";

/// Knobs for a chat turn that are not owned by the provider or limiter
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub max_message_chars: usize,
    pub temperature: f32,
    pub max_tokens: i32,
    pub timeout: Duration,
    pub rate_limited_message: String,
    pub timeout_message: String,
}

impl ChatSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_message_chars: config.chat.max_message_chars,
            temperature: config.openai.temperature,
            max_tokens: config.openai.max_tokens,
            timeout: config.openai.timeout(),
            rate_limited_message: config.chat.rate_limited_message.clone(),
            timeout_message: config.chat.timeout_message.clone(),
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Runs one chat turn: validate, rate-limit, call the completion provider
pub struct ChatService {
    limiter: Arc<dyn RateLimitStore>,
    provider: Option<Arc<dyn CompletionProvider>>,
    persona: Persona,
    settings: ChatSettings,
}

impl ChatService {
    /// `provider` is `None` when no upstream credential is configured.
    pub fn new(
        limiter: Arc<dyn RateLimitStore>,
        provider: Option<Arc<dyn CompletionProvider>>,
        persona: Persona,
        settings: ChatSettings,
    ) -> Self {
        Self {
            limiter,
            provider,
            persona,
            settings,
        }
    }

    pub fn upstream_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub fn provider(&self) -> Option<&Arc<dyn CompletionProvider>> {
        self.provider.as_ref()
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Handle a chat turn at the current wall-clock time.
    pub async fn handle(&self, client_key: &str, message: Option<&str>) -> Result<ChatApiResponse, ChatError> {
        self.handle_at(client_key, message, chrono::Utc::now().timestamp_millis())
            .await
    }

    pub async fn handle_at(
        &self,
        client_key: &str,
        message: Option<&str>,
        now_ms: i64,
    ) -> Result<ChatApiResponse, ChatError> {
        let message = validate_message(message, self.settings.max_message_chars)?;

        let decision = self.limiter.record(client_key, now_ms).await?;
        if let Some(tracked) = self.limiter.tracked_clients() {
            METRICS.tracked_clients.set(tracked as f64);
        }
        if !decision.allowed {
            warn!(client = %client_key, "Rate limit exceeded");
            METRICS.rate_limited_total.inc();
            return Err(ChatError::RateLimited {
                message: self.settings.rate_limited_message.clone(),
            });
        }
        debug!(client = %client_key, remaining = decision.remaining, "Chat request admitted");

        let Some(provider) = &self.provider else {
            error!("Chat request received but no upstream API key is configured");
            return Err(ChatError::Configuration(MISSING_CREDENTIAL.to_string()));
        };

        let request = ChatRequest {
            model: provider.model().to_string(),
            messages: vec![
                ChatMessage::system(self.persona.system_prompt()),
                ChatMessage::user(message),
            ],
            temperature: Some(self.settings.temperature),
            max_tokens: Some(self.settings.max_tokens),
        };

        let reply = self.call_upstream(&**provider, &request).await?;

        Ok(ChatApiResponse {
            response: reply.content,
            remaining: decision.remaining,
        })
    }

    async fn call_upstream(
        &self,
        provider: &dyn CompletionProvider,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ChatError> {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.settings.timeout, provider.chat_completion(request)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout),
        };

        METRICS
            .upstream_duration_seconds
            .with_label_values(&[provider.name()])
            .observe(start.elapsed().as_secs_f64());

        match result {
            Ok(response) => {
                METRICS
                    .upstream_requests_total
                    .with_label_values(&[provider.name(), "ok"])
                    .inc();
                if let Some(usage) = &response.usage {
                    METRICS
                        .tokens_used_total
                        .with_label_values(&[&response.provider, &response.model, "input"])
                        .inc_by(usage.prompt_tokens as f64);
                    METRICS
                        .tokens_used_total
                        .with_label_values(&[&response.provider, &response.model, "output"])
                        .inc_by(usage.completion_tokens as f64);
                }
                Ok(response)
            }
            Err(UpstreamError::Timeout) => {
                error!(
                    provider = provider.name(),
                    timeout_secs = self.settings.timeout.as_secs_f64(),
                    "Completion request timed out"
                );
                METRICS
                    .upstream_requests_total
                    .with_label_values(&[provider.name(), "timeout"])
                    .inc();
                Err(ChatError::UpstreamTimeout {
                    message: self.settings.timeout_message.clone(),
                })
            }
            Err(e) => {
                error!(provider = provider.name(), error = %e, "Completion request failed");
                METRICS
                    .upstream_requests_total
                    .with_label_values(&[provider.name(), "error"])
                    .inc();
                Err(ChatError::Upstream(e))
            }
        }
    }
}

/// Check presence and length of a user message.
///
/// Length is counted in characters, not bytes.
pub fn validate_message(message: Option<&str>, max_chars: usize) -> Result<&str, ChatError> {
    let message = match message {
        Some(m) if !m.is_empty() => m,
        _ => return Err(ChatError::InvalidRequest(MISSING_MESSAGE.to_string())),
    };

    if message.chars().count() > max_chars {
        return Err(ChatError::InvalidRequest(format!(
            "Message is too long (maximum {} characters)",
            max_chars
        )));
    }

    Ok(message)
}

/// Derive the rate-limit key from proxy headers.
///
/// First `x-forwarded-for` entry, then `x-real-ip`, then [`UNKNOWN_CLIENT`].
pub fn client_key(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}
