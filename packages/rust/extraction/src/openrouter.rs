//! OpenRouter chat-completions implementation of [`ExtractionProvider`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use schoolintel_shared::{OpenRouterConfig, Result, SchoolIntelError, UsageCounters};

use crate::{Completion, ExtractionProvider, ExtractionRequest};

/// Default timeout in seconds for one completion.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct OpenRouterOptions {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub cost_per_1k_tokens: f64,
    pub timeout: Duration,
}

impl Default for OpenRouterOptions {
    fn default() -> Self {
        Self::from(&OpenRouterConfig::default())
    }
}

impl From<&OpenRouterConfig> for OpenRouterOptions {
    fn from(config: &OpenRouterConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.default_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            cost_per_1k_tokens: config.cost_per_1k_tokens,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Structured extraction over OpenRouter's OpenAI-compatible API.
pub struct OpenRouterExtractor {
    client: Client,
    api_key: String,
    options: OpenRouterOptions,
    usage: Arc<UsageCounters>,
}

impl OpenRouterExtractor {
    pub fn new(
        api_key: String,
        options: OpenRouterOptions,
        usage: Arc<UsageCounters>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| SchoolIntelError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            options,
            usage,
        })
    }

    /// Create an extractor reading the API key from the env var named in config.
    pub fn from_config(config: &OpenRouterConfig, usage: Arc<UsageCounters>) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| SchoolIntelError::config(format!("{} is not set", config.api_key_env)))?;
        Self::new(api_key, OpenRouterOptions::from(config), usage)
    }

    pub fn model(&self) -> &str {
        &self.options.model
    }

    fn cost_of(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.options.cost_per_1k_tokens
    }
}

#[async_trait]
impl ExtractionProvider for OpenRouterExtractor {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn complete(&self, request: &ExtractionRequest) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.options.base_url);
        let body = ChatRequest {
            model: &self.options.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.content,
                },
            ],
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SchoolIntelError::Extraction(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SchoolIntelError::Extraction(format!(
                "{url}: HTTP {status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SchoolIntelError::Extraction(format!("invalid completion body: {e}")))?;

        let tokens = parsed.usage.unwrap_or_default();
        self.usage.record_extraction(
            tokens.prompt_tokens,
            tokens.completion_tokens,
            self.cost_of(tokens.prompt_tokens + tokens.completion_tokens),
        );

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SchoolIntelError::Extraction("completion had no content".into()))?;

        debug!(
            model = %self.options.model,
            tokens_in = tokens.prompt_tokens,
            tokens_out = tokens.completion_tokens,
            latency_ms = start.elapsed().as_millis() as u64,
            "completion received"
        );

        Ok(Completion {
            text,
            tokens_in: tokens.prompt_tokens,
            tokens_out: tokens.completion_tokens,
            model: parsed.model.unwrap_or_else(|| self.options.model.clone()),
        })
    }
}
