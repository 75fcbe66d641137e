//! HTTP client for OpenAI-compatible embedding APIs.
//!
//! Works with OpenAI, Azure OpenAI and self-hosted servers exposing
//! `POST {api_base}/embeddings` (vLLM, text-embeddings-inference, DashScope
//! compatible mode, ...). Inputs are sent as-is; the service is trusted to
//! reject or truncate over-long texts.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use rag_eval_core::{LoadOptions, RagError, Result};

use crate::retry::RetryPolicy;
use crate::runtime::EmbeddingClient;

/// Base URL used when neither the options nor the environment name one.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Resolved connection settings for the embedding API.
#[derive(Clone)]
pub struct OpenAiConfig {
    /// API base URL, without the `/embeddings` suffix.
    pub api_base: String,
    /// Bearer token.
    pub api_key: String,
    /// Model name (e.g., "text-embedding-3-small").
    pub model: String,
    /// Requested output dimensionality, if the model supports it.
    pub dimensions: Option<usize>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries for transient failures.
    pub max_retries: u32,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl OpenAiConfig {
    /// Resolve settings from the factory options, falling back to
    /// `OPENAI_API_BASE` / `OPENAI_API_KEY`.
    pub fn resolve(model: &str, options: &LoadOptions) -> Result<Self> {
        Self::resolve_with_env(model, options, |name| std::env::var(name).ok())
    }

    fn resolve_with_env(
        model: &str,
        options: &LoadOptions,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let model = model.trim();
        if model.is_empty() {
            return Err(RagError::config("remote embedding model name is empty"));
        }

        let api_base = options
            .api_base
            .clone()
            .or_else(|| env("OPENAI_API_BASE"))
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let api_key = options
            .api_key
            .clone()
            .or_else(|| env("OPENAI_API_KEY"))
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                RagError::config(format!(
                    "no API key for remote model {}: set api_key or OPENAI_API_KEY",
                    model
                ))
            })?;

        Ok(Self {
            api_base,
            api_key,
            model: model.to_string(),
            dimensions: options.dimensions,
            timeout_secs: options.timeout_secs,
            max_retries: options.max_retries,
        })
    }

    /// Full embeddings endpoint URL.
    pub fn endpoint(&self) -> String {
        format!("{}/embeddings", self.api_base.trim_end_matches('/'))
    }
}

/// OpenAI embedding request format
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    encoding_format: &'a str,
}

/// OpenAI embedding response format
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: usize,
}

/// OpenAI error response format
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Blocking client for an OpenAI-compatible embeddings endpoint.
#[derive(Debug)]
pub struct OpenAiEmbeddingClient {
    client: Client,
    config: OpenAiConfig,
    retry: RetryPolicy,
}

impl OpenAiEmbeddingClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        info!(
            "Initializing embedding API client: endpoint={}, model={}",
            config.endpoint(),
            config.model
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth_value = format!("Bearer {}", config.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| RagError::config(format!("Invalid API key format: {}", e)))?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| RagError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            retry: RetryPolicy::with_max_retries(config.max_retries),
            config,
        })
    }

    /// Replace the backoff derived from `max_retries`.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    /// One POST for one chunk of inputs.
    fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            dimensions: self.config.dimensions,
            encoding_format: "float",
        };

        debug!(
            "Sending embedding request to {} for {} texts",
            self.config.api_base,
            texts.len()
        );

        let response = self
            .client
            .post(self.config.endpoint())
            .json(&request)
            .send()
            .map_err(|e| RagError::transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000);
            return Err(RagError::RateLimited { retry_after_ms });
        }

        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(api_error(status.as_u16(), &body));
        }

        let body = response
            .text()
            .map_err(|e| RagError::transport(format!("Failed to read response: {}", e)))?;
        parse_embeddings(&body, texts.len())
    }
}

/// Turn an error body into an API error, preferring the structured message.
fn api_error(status: u16, body: &str) -> RagError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|r| r.error.message)
        .unwrap_or_else(|_| body.to_string());
    RagError::Api { status, message }
}

/// Parse a success body into vectors ordered by their `index`.
fn parse_embeddings(body: &str, expected: usize) -> Result<Vec<Vec<f32>>> {
    let response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| RagError::contract(format!("Failed to parse response: {}", e)))?;

    if let Some(usage) = &response.usage {
        debug!("Embedding request used {} tokens", usage.total_tokens);
    }

    if response.data.len() != expected {
        return Err(RagError::contract(format!(
            "API returned {} embeddings for {} inputs",
            response.data.len(),
            expected
        )));
    }

    let mut data = response.data;
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

impl EmbeddingClient for OpenAiEmbeddingClient {
    fn embed_documents(&self, texts: &[String], chunk_size: usize) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(chunk_size.max(1)) {
            let vectors = self
                .retry
                .run("embedding request", || self.request_embeddings(chunk))?;
            embeddings.extend(vectors);
        }
        Ok(embeddings)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}
