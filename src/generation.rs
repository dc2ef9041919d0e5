//! Text-generation boundary and prompt composition.
//!
//! The engine never calls a generator for ranking; deferred answer tasks
//! hand it a prompt built from a [`ContextBundle`] by [`compose_prompt`].
//! Every attempt is bounded by [`complete_with_timeout`];
//! [`complete_with_retry`] retries `GenerationUnavailable` up to
//! `max_retries` times with the same doubling backoff as embedding calls.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use channel_recall_core::models::ContextBundle;
use channel_recall_core::RecallError;

use crate::config::GenerationConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";

/// An external text-completion service.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    /// `false` for providers that can never succeed; their errors are
    /// surfaced without retrying.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn complete(&self, prompt: &str) -> Result<String, RecallError>;
}

/// Per-call deadline and retry budget for generation.
#[derive(Debug, Clone, Copy)]
pub struct GenerationPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl GenerationPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

/// Build the grounding prompt for `bundle`.
pub fn compose_prompt(bundle: &ContextBundle) -> String {
    format!(
        "User asks: {}\n{}\n# Instructions: Use the search results to answer the user's query.",
        bundle.query,
        bundle.render()
    )
}

/// Run `generator.complete` with a deadline.
pub async fn complete_with_timeout(
    generator: &dyn Generator,
    prompt: &str,
    timeout: Duration,
) -> Result<String, RecallError> {
    match tokio::time::timeout(timeout, generator.complete(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(RecallError::GenerationUnavailable(format!(
            "{} timed out after {:?}",
            generator.model_name(),
            timeout
        ))),
    }
}

/// Run `generator.complete`, retrying `GenerationUnavailable` within
/// `policy.max_retries`. Other errors are returned as-is.
pub async fn complete_with_retry(
    generator: &dyn Generator,
    prompt: &str,
    policy: &GenerationPolicy,
) -> Result<String, RecallError> {
    let mut attempt: u32 = 0;

    loop {
        match complete_with_timeout(generator, prompt, policy.timeout).await {
            Ok(text) => {
                if attempt > 0 {
                    debug!(attempt, "generation succeeded after retry");
                }
                return Ok(text);
            }
            Err(RecallError::GenerationUnavailable(reason))
                if generator.is_enabled() && attempt < policy.max_retries =>
            {
                attempt += 1;
                let delay = policy.backoff * (1u32 << (attempt - 1).min(5));
                warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "generation unavailable, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn is_enabled(&self) -> bool {
        false
    }
    async fn complete(&self, _prompt: &str) -> Result<String, RecallError> {
        Err(RecallError::GenerationUnavailable(
            "generation provider is disabled".to_string(),
        ))
    }
}

/// Chat-completion client for the OpenAI API (`POST /v1/chat/completions`).
pub struct OpenAIGenerator {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
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
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, RecallError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| RecallError::GenerationUnavailable(format!("connection error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RecallError::GenerationUnavailable(format!(
                "OpenAI API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RecallError::GenerationUnavailable(format!("decode error: {}", e)))?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String, RecallError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            RecallError::GenerationUnavailable(
                "Invalid OpenAI response: missing choices[0].message.content".to_string(),
            )
        })
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use channel_recall_core::models::ContextPassage;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Slow;

    #[async_trait]
    impl Generator for Slow {
        fn model_name(&self) -> &str {
            "slow"
        }
        async fn complete(&self, _prompt: &str) -> Result<String, RecallError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("late".into())
        }
    }

    #[test]
    fn test_compose_prompt() {
        let bundle = ContextBundle {
            query: "What were the main toxicities?".into(),
            passages: vec![ContextPassage {
                chunk_id: "c".into(),
                document_id: "d".into(),
                ordinal: 0,
                page: Some(4),
                text: "Fever and fatigue.".into(),
                distance: 0.12,
            }],
        };
        let prompt = compose_prompt(&bundle);
        assert!(prompt.starts_with("User asks: What were the main toxicities?\n"));
        assert!(prompt.contains("Search results from documents:\n# Result 0\nFever and fatigue."));
        assert!(prompt.ends_with("answer the user's query."));
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Fever." } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "Fever.");
        assert!(parse_chat_response(&serde_json::json!({})).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_generation_unavailable() {
        let err = complete_with_timeout(&Slow, "p", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RecallError::GenerationUnavailable(_)));
    }

    /// Unavailable for the first `failures` calls, then answers.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Generator for Flaky {
        fn model_name(&self) -> &str {
            "flaky"
        }
        async fn complete(&self, _prompt: &str) -> Result<String, RecallError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(RecallError::GenerationUnavailable("503".into()))
            } else {
                Ok("recovered".into())
            }
        }
    }

    fn policy(max_retries: u32) -> GenerationPolicy {
        GenerationPolicy {
            timeout: Duration::from_secs(5),
            max_retries,
            backoff: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_unavailable() {
        let generator = Flaky::new(2);
        let started = tokio::time::Instant::now();
        let text = complete_with_retry(&generator, "p", &policy(3)).await.unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
        // 100ms then 200ms of backoff.
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_is_bounded() {
        let generator = Flaky::new(10);
        let err = complete_with_retry(&generator, "p", &policy(2)).await.unwrap_err();
        assert!(matches!(err, RecallError::GenerationUnavailable(_)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_count_against_budget() {
        let err = complete_with_retry(&Slow, "p", &policy(1)).await.unwrap_err();
        assert!(matches!(err, RecallError::GenerationUnavailable(_)));
    }

    #[tokio::test]
    async fn test_disabled_generator_is_not_retried() {
        let started = std::time::Instant::now();
        let err = complete_with_retry(&DisabledGenerator, "p", &GenerationPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RecallError::GenerationUnavailable(_)));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_disabled_generator() {
        let generator = create_generator(&GenerationConfig::default()).unwrap();
        assert!(matches!(
            generator.complete("x").await,
            Err(RecallError::GenerationUnavailable(_))
        ));
    }
}
