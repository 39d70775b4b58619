use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, time::Duration};

use crate::persona::{Persona, PersonaProfile};
use crate::rate_limit::RateLimitPolicy;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const CONFIG_PATH_ENV: &str = "PORTFOLIO_CHAT_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub openai: OpenAIConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_bind")]
    pub bind: String,
    #[serde(default = "default_true")]
    pub cors_permissive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    #[serde(default = "default_rate_limited_message")]
    pub rate_limited_message: String,
    #[serde(default = "default_timeout_message")]
    pub timeout_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_calls")]
    pub max_calls: u32,
    /// Evict clients idle for this many windows; unset keeps every key for the process lifetime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_eviction_windows: Option<u32>,
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub profile: PersonaProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Defaults
fn default_http_bind() -> String { "0.0.0.0:8080".to_string() }
fn default_true() -> bool { true }
fn default_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_model() -> String { "gpt-3.5-turbo".to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> i32 { 250 }
fn default_timeout_secs() -> u64 { 30 }
fn default_max_message_chars() -> usize { 500 }
fn default_rate_limited_message() -> String {
    "You've reached the hourly message limit. Please try again later.".to_string()
}
fn default_timeout_message() -> String {
    "The assistant took too long to respond. Please try again.".to_string()
}
fn default_window_secs() -> u64 { 3600 }
fn default_max_calls() -> u32 { 20 }
fn default_eviction_interval() -> u64 { 600 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_http_bind(),
            cors_permissive: true,
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
            rate_limited_message: default_rate_limited_message(),
            timeout_message: default_timeout_message(),
        }
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_calls: default_max_calls(),
            idle_eviction_windows: None,
            eviction_interval_secs: default_eviction_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl OpenAIConfig {
    /// API key, if one is set and non-blank
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|key| !key.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RateLimitingConfig {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(Duration::from_secs(self.window_secs), self.max_calls)
    }
}

impl PersonaConfig {
    pub fn persona(&self) -> Persona {
        match &self.system_prompt {
            Some(prompt) if !prompt.trim().is_empty() => Persona::from_prompt(prompt.clone()),
            _ => Persona::from_profile(&self.profile),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let mut config = match Self::find_config_file() {
            Some(path) => Self::from_file(&path)?,
            None => {
                tracing::debug!("No config file found, using defaults");
                Config::default()
            }
        };

        config.apply_credential_fallback(env::var(API_KEY_ENV).ok());
        config.validate()?;

        Ok(config)
    }

    /// Read and parse a TOML config file, substituting `${VAR}` placeholders
    pub fn from_file(path: &str) -> Result<Self> {
        #[cfg(unix)]
        Self::validate_file_permissions(path)?;

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let content = Self::substitute_env_vars(content);
        Ok(toml::from_str(&content)?)
    }

    fn find_config_file() -> Option<String> {
        if let Ok(path) = env::var(CONFIG_PATH_ENV) {
            return Some(path);
        }

        let home_config = format!(
            "{}/.config/portfolio-chat/config.toml",
            env::var("HOME").unwrap_or_default()
        );
        let locations = [
            "./config.toml",
            "./portfolio-chat.toml",
            "/etc/portfolio-chat/config.toml",
            home_config.as_str(),
        ];

        locations
            .into_iter()
            .find(|path| Path::new(path).exists())
            .map(str::to_string)
    }

    /// Use `env_key` (normally `OPENAI_API_KEY`) when the file leaves the key unset or blank
    fn apply_credential_fallback(&mut self, env_key: Option<String>) {
        if self.openai.credential().is_none() {
            self.openai.api_key = env_key;
        }
    }

    /// Substitute ${VAR_NAME} with environment variable values
    fn substitute_env_vars(content: &str) -> String {
        let mut result = content.to_string();
        let mut search_from = 0;

        while let Some(offset) = result[search_from..].find("${") {
            let start = search_from + offset;
            let Some(end) = result[start..].find('}') else {
                break;
            };
            let var_name = &result[start + 2..start + end];
            let value = env::var(var_name).unwrap_or_default();
            result.replace_range(start..start + end + 1, &value);
            search_from = start + value.len();
        }

        result
    }

    fn validate(&self) -> Result<()> {
        if self.rate_limiting.window_secs == 0 {
            anyhow::bail!("rate_limiting.window_secs must be greater than zero");
        }
        if self.chat.max_message_chars == 0 {
            anyhow::bail!("chat.max_message_chars must be greater than zero");
        }
        if self.openai.timeout_secs == 0 {
            anyhow::bail!("openai.timeout_secs must be greater than zero");
        }
        if self.openai.credential().is_none() {
            tracing::warn!(
                "{} not set - chat requests will fail with a configuration error",
                API_KEY_ENV
            );
        }
        Ok(())
    }

    /// Validate config file permissions (Unix only)
    #[cfg(unix)]
    fn validate_file_permissions(path: &str) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let path_obj = Path::new(path);

        if !path_obj.exists() {
            tracing::debug!("Config file does not exist: {}", path);
            return Ok(());
        }

        let metadata = fs::metadata(path_obj)
            .with_context(|| format!("Failed to read metadata for config file: {}", path))?;

        let mode = metadata.permissions().mode();

        let group_readable = (mode & 0o040) != 0;
        let others_readable = (mode & 0o004) != 0;
        let group_writable = (mode & 0o020) != 0;
        let others_writable = (mode & 0o002) != 0;

        if group_readable || others_readable {
            tracing::warn!(
                "Config file {} has permissive mode {:o}; it may hold an API key, consider chmod 600",
                path,
                mode & 0o777
            );
        }

        if group_writable || others_writable {
            anyhow::bail!(
                "Config file {} is writable by group or others (mode: {:o}). Run: chmod 600 {}",
                path,
                mode & 0o777,
                path
            );
        }

        Ok(())
    }
}
