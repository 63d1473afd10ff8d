//! Runtime settings read from the environment.
//!
//! `.env` in the working directory is loaded first (if present), then the
//! process environment is consulted. Every setting has a default except the
//! provider API key.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::backend::CampaignBackend;
use crate::error::PipelineError;
use crate::llm::{AnthropicClient, LlmClient, LlmError, LlmOptions, OpenAiClient};
use crate::{
    DEFAULT_COLLECTION, DEFAULT_DB_NAME, DEFAULT_MONGO_URI, DEFAULT_RESULT_LIMIT, clamp_limit,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Which model provider answers the pipeline's prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
}

/// Everything the binaries need to build an [`crate::pipeline::Assistant`].
#[derive(Clone)]
pub struct Settings {
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    /// Overrides the provider's default model when set.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_retries: usize,
    pub llm_timeout: Duration,
    pub mongo_uri: String,
    pub db_name: String,
    pub collection: String,
    /// When set, campaigns are served from this JSON file instead of MongoDB.
    pub campaigns_file: Option<PathBuf>,
    pub result_limit: usize,
}

impl Settings {
    /// Load `.env` (if any) and read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let provider = match get("AIGENTZ_PROVIDER") {
            None => Provider::OpenAi,
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "openai" => Provider::OpenAi,
                "anthropic" => Provider::Anthropic,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "AIGENTZ_PROVIDER",
                        value,
                    });
                }
            },
        };

        let temperature = parse_var(&get, "AIGENTZ_TEMPERATURE", 0.0_f32)?;
        let max_retries = parse_var(&get, "AIGENTZ_MAX_RETRIES", 2_usize)?;
        let timeout_secs = parse_var(&get, "AIGENTZ_LLM_TIMEOUT_SECS", 60_u64)?;
        let result_limit = parse_var(&get, "AIGENTZ_RESULT_LIMIT", DEFAULT_RESULT_LIMIT)?;

        Ok(Self {
            provider,
            openai_api_key: get("OPENAI_API_KEY"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            model: get("AIGENTZ_MODEL"),
            temperature,
            max_retries,
            llm_timeout: Duration::from_secs(timeout_secs),
            mongo_uri: get("MONGO_URI").unwrap_or_else(|| DEFAULT_MONGO_URI.to_string()),
            db_name: get("AIGENTZ_DB_NAME").unwrap_or_else(|| DEFAULT_DB_NAME.to_string()),
            collection: get("AIGENTZ_COLLECTION").unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            campaigns_file: get("AIGENTZ_CAMPAIGNS_FILE").map(PathBuf::from),
            result_limit: clamp_limit(result_limit),
        })
    }

    /// Sampling options for the configured provider.
    pub fn llm_options(&self) -> LlmOptions {
        let mut options = match self.provider {
            Provider::OpenAi => LlmOptions::openai_defaults(),
            Provider::Anthropic => LlmOptions::anthropic_defaults(),
        };
        if let Some(model) = &self.model {
            options.model = model.clone();
        }
        options.temperature = self.temperature;
        options.max_retries = self.max_retries;
        options.timeout = self.llm_timeout;
        options
    }

    /// Build the model client for the configured provider.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::MissingApiKey`] when the provider's key is absent.
    pub fn build_llm(&self) -> Result<Arc<dyn LlmClient>, LlmError> {
        let options = self.llm_options();
        info!(provider = ?self.provider, model = %options.model, "using language model");
        match self.provider {
            Provider::OpenAi => {
                let key = self
                    .openai_api_key
                    .clone()
                    .ok_or(LlmError::MissingApiKey("OPENAI_API_KEY"))?;
                Ok(Arc::new(OpenAiClient::with_options(key, options)))
            }
            Provider::Anthropic => {
                let key = self
                    .anthropic_api_key
                    .clone()
                    .ok_or(LlmError::MissingApiKey("ANTHROPIC_API_KEY"))?;
                Ok(Arc::new(AnthropicClient::with_options(key, options)))
            }
        }
    }

    /// Open the campaign store: the local JSON file when configured, MongoDB otherwise.
    pub async fn connect_backend(&self) -> Result<CampaignBackend, PipelineError> {
        match &self.campaigns_file {
            Some(path) => {
                info!(path = %path.display(), "serving campaigns from local file");
                CampaignBackend::load_local(path)
            }
            None => {
                info!(db = %self.db_name, collection = %self.collection, "connecting to MongoDB");
                CampaignBackend::connect_mongo(&self.mongo_uri, &self.db_name, &self.collection).await
            }
        }
    }
}

fn parse_var<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
