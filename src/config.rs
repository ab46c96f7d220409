//! Run configuration: scenario files, environment, validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main run configuration, loaded from a YAML scenario file or the
/// environment. Validated once at startup and never mutated during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Full endpoint URL override; when unset the URL is built from
    /// `target_host` and `target_port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_host")]
    pub target_host: String,
    #[serde(default = "default_port")]
    pub target_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model_name: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_total_requests")]
    pub total_requests: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    #[serde(default = "default_warmup_requests")]
    pub warmup_requests: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_prompts")]
    pub prompts: Vec<PromptConfig>,
    #[serde(default)]
    pub prompt_selection: PromptSelection,
    #[serde(default)]
    pub log_requests: bool,
}

/// One candidate prompt with its selection weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    pub text: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// How prompts are picked across requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptSelection {
    /// Weighted random selection, reproducible with `seed`.
    #[default]
    Weighted,
    /// Cycle through the prompt list in order.
    Sequential,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_tokens() -> u32 {
    128
}

fn default_total_requests() -> u64 {
    50
}

fn default_concurrency() -> u32 {
    1
}

fn default_warmup_requests() -> u64 {
    5
}

fn default_timeout_secs() -> f64 {
    30.0
}

fn default_weight() -> f64 {
    1.0
}

fn default_prompts() -> Vec<PromptConfig> {
    vec![PromptConfig {
        text: "Explain the concept of machine learning in one paragraph.".to_string(),
        weight: 1.0,
    }]
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl RunConfig {
    /// Load configuration from a YAML scenario file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RunConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Build configuration from environment variables.
    ///
    /// Recognizes `VLLM_URL`, `VLLM_HOST`, `VLLM_PORT`, `VLLM_API_KEY`,
    /// `MODEL_NAME`, `MAX_MODEL_LEN`, `LOAD_REQUESTS` and
    /// `LOAD_CONCURRENCY`, matching the knobs the serving environment
    /// already exports.
    pub fn from_env() -> Self {
        Self {
            name: "env".to_string(),
            description: "Configuration from environment".to_string(),
            url: std::env::var("VLLM_URL").ok(),
            target_host: std::env::var("VLLM_HOST").unwrap_or_else(|_| default_host()),
            target_port: env_parse("VLLM_PORT").unwrap_or_else(default_port),
            api_key: std::env::var("VLLM_API_KEY").ok(),
            model_name: std::env::var("MODEL_NAME")
                .unwrap_or_else(|_| "mistralai/Mistral-7B-Instruct-v0.3".to_string()),
            max_tokens: env_parse("MAX_MODEL_LEN").unwrap_or_else(default_max_tokens),
            temperature: 0.0,
            total_requests: env_parse("LOAD_REQUESTS").unwrap_or_else(default_total_requests),
            concurrency: env_parse("LOAD_CONCURRENCY").unwrap_or_else(default_concurrency),
            warmup_requests: default_warmup_requests(),
            timeout_secs: default_timeout_secs(),
            seed: None,
            prompts: default_prompts(),
            prompt_selection: PromptSelection::default(),
            log_requests: false,
        }
    }

    /// The chat-completions endpoint this run targets.
    pub fn endpoint_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "http://{}:{}/v1/chat/completions",
                self.target_host, self.target_port
            ),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    /// Validate structural invariants. Called once before any request is
    /// dispatched; a failure here aborts the run with no outcomes.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be >= 1");
        }
        if self.model_name.is_empty() {
            anyhow::bail!("model_name must not be empty");
        }
        if self.max_tokens == 0 {
            anyhow::bail!("max_tokens must be >= 1");
        }
        if !(self.timeout_secs > 0.0) {
            anyhow::bail!("timeout_secs must be > 0");
        }
        if self.prompts.is_empty() {
            anyhow::bail!("at least one prompt must be specified");
        }
        if self.prompts.iter().any(|p| !(p.weight > 0.0)) {
            anyhow::bail!("prompt weights must be > 0");
        }
        if let Some(url) = &self.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("url must start with http:// or https://");
            }
        }
        Ok(())
    }
}
