//! HTTP embedding providers.
//!
//! Concrete [`Embedder`] implementations:
//! - **[`DisabledEmbedder`]**: always fails; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! # Error Classification
//!
//! Each call is a single attempt. Failures are classified so the engine can
//! decide whether to retry:
//! - HTTP 429 → [`EmbedError::RateLimited`]
//! - HTTP 5xx, network errors, malformed responses → [`EmbedError::Unavailable`]
//! - Other HTTP 4xx → [`EmbedError::Rejected`] (never retried)
//!
//! Retry, backoff and the per-call timeout live in
//! [`RetrievalEngine`](crate::engine::RetrievalEngine).

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;

use channel_recall_core::embedding::Embedder;
use channel_recall_core::EmbedError;

use crate::config::EmbeddingConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

// ============ Disabled Provider ============

/// An embedder that always fails with [`EmbedError::Disabled`].
pub struct DisabledEmbedder {
    dims: usize,
}

impl DisabledEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

// ============ Shared HTTP plumbing ============

/// Map a non-success HTTP status to an [`EmbedError`].
fn classify_status(status: StatusCode, body: String, service: &str) -> EmbedError {
    let msg = format!("{} API error {}: {}", service, status, body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        EmbedError::RateLimited(msg)
    } else if status.is_server_error() {
        EmbedError::Unavailable(msg)
    } else {
        EmbedError::Rejected(msg)
    }
}

async fn post_json(
    request: reqwest::RequestBuilder,
    service: &str,
) -> Result<serde_json::Value, EmbedError> {
    let response = request.send().await.map_err(|e| {
        EmbedError::Unavailable(format!("{} connection error: {}", service, e))
    })?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(classify_status(status, body_text, service));
    }

    response
        .json()
        .await
        .map_err(|e| EmbedError::Unavailable(format!("{} response decode error: {}", service, e)))
}

fn parse_vector(value: &serde_json::Value, service: &str) -> Result<Vec<f32>, EmbedError> {
    value
        .as_array()
        .ok_or_else(|| {
            EmbedError::Unavailable(format!(
                "Invalid {} response: embedding is not an array",
                service
            ))
        })?
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                EmbedError::Unavailable(format!(
                    "Invalid {} response: non-numeric embedding component",
                    service
                ))
            })
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Embedder using the OpenAI API.
///
/// Calls `POST {url}/v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };

        Ok(Self {
            client: reqwest::Client::new(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let request = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);
        let json = post_json(request, "OpenAI").await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[0].embedding` from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbedError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .ok_or_else(|| {
            EmbedError::Unavailable("Invalid OpenAI response: missing data[0].embedding".into())
        })?;
    parse_vector(embedding, "OpenAI")
}

// ============ Ollama Provider ============

/// Embedder using a local Ollama instance.
///
/// Calls `POST {url}/api/embed` (default `http://localhost:11434`). Requires
/// Ollama to be running with an embedding model pulled.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;

        Ok(Self {
            client: reqwest::Client::new(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body);
        let json = post_json(request, "Ollama").await?;
        parse_ollama_response(&json)
    }
}

/// Extract `embeddings[0]` from an Ollama `/api/embed` response.
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbedError> {
    let embedding = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .ok_or_else(|| {
            EmbedError::Unavailable("Invalid Ollama response: missing embeddings array".into())
        })?;
    parse_vector(embedding, "Ollama")
}

/// Create the configured [`Embedder`].
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder::new(config.dims.unwrap_or(1)))),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
