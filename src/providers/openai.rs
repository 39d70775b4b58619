use crate::config::OpenAIConfig;
use crate::error::UpstreamError;
use crate::providers::CompletionProvider;
use crate::types::{ChatRequest, ChatResponse, Usage};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAIProvider {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model,
        })
    }

    /// Point at an OpenAI-compatible endpoint other than api.openai.com
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build from config; `Ok(None)` when no API key is configured.
    pub fn from_config(config: &OpenAIConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.credential() else {
            return Ok(None);
        };

        let provider = Self::new(api_key.to_string(), config.model.clone(), config.timeout())?
            .with_base_url(config.base_url.as_str());

        Ok(Some(provider))
    }
}

// OpenAI API types
#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<i32>,
    stream: bool,
}

#[derive(Serialize)]
struct OpenAIMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    prompt_tokens: i32,
    completion_tokens: i32,
    total_tokens: i32,
}

#[async_trait]
impl CompletionProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse, UpstreamError> {
        let messages = request
            .messages
            .iter()
            .map(|m| OpenAIMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        let openai_req = OpenAIRequest {
            model: &request.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };

        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&openai_req)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let openai_res: OpenAIResponse = res.json().await?;

        let choice = openai_res
            .choices
            .into_iter()
            .next()
            .ok_or(UpstreamError::EmptyResponse)?;

        let content = choice
            .message
            .content
            .filter(|c| !c.is_empty())
            .ok_or(UpstreamError::EmptyResponse)?;

        Ok(ChatResponse {
            provider: "openai".to_string(),
            model: openai_res.model.unwrap_or_else(|| request.model.clone()),
            content,
            usage: openai_res.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }
}
