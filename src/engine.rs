//! The Retrieval Orchestrator.
//!
//! [`RetrievalEngine`] is the only component callers talk to. It holds no
//! mutable state: every collaborator (vector index, message history,
//! document source, embedder) is passed in explicitly, and all durable
//! state lives behind those traits. The engine is `Send + Sync` and is
//! shared via `Arc`.
//!
//! Operations are split across modules:
//!
//! | Module | Operations |
//! |--------|------------|
//! | [`ingest`](crate::ingest) | `ingest`, `ingest_bytes` |
//! | [`search`](crate::search) | `search`, `recent_messages` |
//! | [`rag`](crate::rag) | `rag_query` |
//!
//! # Embedding calls
//!
//! Every embedding call goes through [`RetrievalEngine::embed_with_retry`]:
//! - each attempt is bounded by `embed_timeout`
//! - rate limits, server errors, network errors and timeouts are retried
//!   up to `max_retries` times
//! - backoff: `backoff`, `2 × backoff`, `4 × backoff`, ... (capped at 2^5)
//! - rejected input is never retried

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use channel_recall_core::chunk::validate_params;
use channel_recall_core::embedding::{ensure_dimension, Embedder};
use channel_recall_core::store::{DocumentSource, MessageHistory, VectorIndex};
use channel_recall_core::{EmbedError, RecallError};

use crate::blobs::FsDocumentSource;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;

/// Tuning knobs, decoupled from the TOML config.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub top_k: usize,
    pub max_distance: Option<f32>,
    pub max_matches: usize,
    pub embed_timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_chars: 4000,
            overlap_chars: 500,
            top_k: 3,
            max_distance: None,
            max_matches: 100,
            embed_timeout: Duration::from_secs(30),
            max_retries: 5,
            backoff: Duration::from_millis(1000),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_chars: config.chunking.max_chars,
            overlap_chars: config.chunking.overlap_chars,
            top_k: config.retrieval.top_k,
            max_distance: config.retrieval.max_distance,
            max_matches: config.search.max_matches,
            embed_timeout: Duration::from_secs(config.embedding.timeout_secs),
            max_retries: config.embedding.max_retries,
            backoff: Duration::from_millis(config.embedding.backoff_ms),
        }
    }
}

pub struct RetrievalEngine {
    pub(crate) index: Arc<dyn VectorIndex>,
    pub(crate) history: Arc<dyn MessageHistory>,
    pub(crate) documents: Arc<dyn DocumentSource>,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) settings: EngineSettings,
}

impl RetrievalEngine {
    /// Assemble an engine.
    ///
    /// Fails with [`RecallError::Configuration`] for invalid chunking
    /// parameters or when the embedder's dimension differs from the index's.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        history: Arc<dyn MessageHistory>,
        documents: Arc<dyn DocumentSource>,
        embedder: Arc<dyn Embedder>,
        settings: EngineSettings,
    ) -> Result<Self, RecallError> {
        validate_params(settings.max_chars, settings.overlap_chars)?;
        if embedder.dims() != index.dimension() {
            return Err(RecallError::Configuration(format!(
                "embedder {} produces {} dimensions but the index stores {}",
                embedder.model_name(),
                embedder.dims(),
                index.dimension()
            )));
        }
        Ok(Self {
            index,
            history,
            documents,
            embedder,
            settings,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Embed `text` with timeout and bounded retry, then check its length
    /// against the index dimension.
    pub async fn embed_with_retry(&self, text: &str) -> Result<Vec<f32>, RecallError> {
        let timeout = self.settings.embed_timeout;
        let mut attempt: u32 = 0;

        loop {
            let outcome = match tokio::time::timeout(timeout, self.embedder.embed(text)).await {
                Ok(result) => result,
                Err(_) => Err(EmbedError::Timeout(timeout)),
            };

            match outcome {
                Ok(vector) => {
                    ensure_dimension(self.index.dimension(), &vector)?;
                    if attempt > 0 {
                        debug!(attempt, "embedding succeeded after retry");
                    }
                    return Ok(vector);
                }
                Err(err) if err.is_transient() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    let delay = self.settings.backoff * (1u32 << (attempt - 1).min(5));
                    warn!(
                        attempt,
                        max_retries = self.settings.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient embedding failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Everything the CLI needs, built from one config.
pub struct Services {
    pub engine: Arc<RetrievalEngine>,
    pub store: Arc<SqliteStore>,
    pub documents: Arc<FsDocumentSource>,
}

impl Services {
    /// Open the database and assemble the engine with the configured
    /// embedder. The caller owns the returned pool through `store`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let store = Arc::new(SqliteStore::new(pool.clone(), config.dims()));
        let documents = Arc::new(FsDocumentSource::new(pool, config.blob_dir()));
        let embedder = create_embedder(&config.embedding)?;

        let engine = RetrievalEngine::new(
            store.clone(),
            store.clone(),
            documents.clone(),
            embedder,
            EngineSettings::from_config(config),
        )?;

        Ok(Self {
            engine: Arc::new(engine),
            store,
            documents,
        })
    }

    pub async fn close(&self) {
        self.store.pool().close().await;
    }
}
