//! Configuration management for the agent pipeline service.
//!
//! Configuration can be set via environment variables:
//! - `ANTHROPIC_API_KEY` - Required. API key for the model provider.
//! - `ANTHROPIC_BASE_URL` - Optional. Defaults to `https://api.anthropic.com`.
//! - `DEFAULT_MODEL` - Optional. Model used by every built-in agent. Defaults to `claude-sonnet-4-5`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `MAX_ITERATIONS` - Optional. Default agent loop cap. Defaults to `8`.
//! - `MAX_OUTPUT_TOKENS` - Optional. Default output token cap per model call. Defaults to `4096`.
//! - `LLM_TIMEOUT_SECS` - Optional. Hard timeout per model call. Defaults to `60`.
//! - `LLM_MAX_RETRIES` - Optional. Extra attempts on transient errors. Defaults to `2`.
//! - `LLM_BACKOFF_BASE_MS` / `LLM_BACKOFF_MAX_MS` - Optional. Retry backoff bounds.
//! - `PIPELINE_RETENTION_SECS` - Optional. How long finished pipelines stay queryable. Defaults to one day.
//! - `PIPELINE_EVICTION_INTERVAL_SECS` - Optional. Eviction sweep period. Defaults to `300`.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::llm::{BackoffConfig, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Provider API key
    pub api_key: String,

    /// Provider base URL (no trailing slash)
    pub api_base_url: String,

    /// Model identifier used by the built-in agents
    pub default_model: String,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Maximum iterations for each agent loop
    pub max_iterations: usize,

    /// Output token cap per model call
    pub max_output_tokens: u32,

    /// Transport settings for model calls
    pub llm: LlmTransportConfig,

    /// How long terminal pipelines are retained
    pub pipeline_retention: Duration,

    /// How often the retention sweep runs
    pub eviction_interval: Duration,
}

/// Timeout and retry settings for the model transport.
#[derive(Debug, Clone)]
pub struct LlmTransportConfig {
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for LlmTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            max_retries: 2,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_millis(8000),
        }
    }
}

impl LlmTransportConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            request_timeout: self.request_timeout,
            max_retries: self.max_retries,
            backoff: BackoffConfig {
                base_delay: self.backoff_base,
                max_delay: self.backoff_max,
                multiplier: 2.0,
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `ANTHROPIC_API_KEY` is not set,
    /// and `ConfigError::InvalidValue` for unparsable numeric settings.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;

        let api_base_url = std::env::var("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com".to_string())
            .trim_end_matches('/')
            .to_string();

        let default_model =
            std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| "claude-sonnet-4-5".to_string());

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env_parse("PORT", 3000u16)?;

        let max_iterations = env_parse("MAX_ITERATIONS", 8usize)?;
        if max_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ITERATIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let max_output_tokens = env_parse("MAX_OUTPUT_TOKENS", 4096u32)?;

        let llm = LlmTransportConfig {
            request_timeout: Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", 60u64)?),
            max_retries: env_parse("LLM_MAX_RETRIES", 2u32)?,
            backoff_base: Duration::from_millis(env_parse("LLM_BACKOFF_BASE_MS", 500u64)?),
            backoff_max: Duration::from_millis(env_parse("LLM_BACKOFF_MAX_MS", 8000u64)?),
        };

        let pipeline_retention =
            Duration::from_secs(env_parse("PIPELINE_RETENTION_SECS", 86_400u64)?);
        let eviction_interval =
            Duration::from_secs(env_parse("PIPELINE_EVICTION_INTERVAL_SECS", 300u64)?);

        Ok(Self {
            api_key,
            api_base_url,
            default_model,
            host,
            port,
            max_iterations,
            max_output_tokens,
            llm,
            pipeline_retention,
            eviction_interval,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, default_model: String) -> Self {
        Self {
            api_key,
            api_base_url: "https://api.anthropic.com".to_string(),
            default_model,
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_iterations: 8,
            max_output_tokens: 4096,
            llm: LlmTransportConfig::default(),
            pipeline_retention: Duration::from_secs(86_400),
            eviction_interval: Duration::from_secs(300),
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
