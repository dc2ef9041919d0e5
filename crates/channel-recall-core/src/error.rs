//! Error taxonomy for retrieval operations.
//!
//! Library code returns [`RecallError`] directly; the `recall` binary
//! converts to `anyhow::Error` at the boundary. Embedding backends report
//! the narrower [`EmbedError`], which the orchestrator classifies into
//! retryable and fatal outcomes.

/// Errors that can occur while ingesting, indexing, or querying.
///
/// # Examples
///
/// ```
/// use channel_recall_core::RecallError;
///
/// let err = RecallError::DimensionMismatch { expected: 3, actual: 2 };
/// assert_eq!(err.to_string(), "embedding dimension mismatch: expected 3, got 2");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    /// Invalid chunking or engine parameters. A caller bug.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The declared content type cannot be extracted.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// An embedding's length differs from the configured dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The embedding service failed or timed out after all retries.
    #[error("embedding service unavailable: {0}")]
    EmbedderUnavailable(String),

    /// The embedding service refused the input. Retrying will not help.
    #[error("embedding service rejected input: {0}")]
    EmbeddingRejected(String),

    /// The text-generation service failed or timed out.
    #[error("generation service unavailable: {0}")]
    GenerationUnavailable(String),

    /// A uniqueness or locking conflict in the storage backend.
    #[error("storage conflict: {0}")]
    StorageConflict(String),

    /// Unknown document, chunk, or channel.
    #[error("not found: {0}")]
    NotFound(String),

    /// Ingestion halted part-way. `chunks_stored` chunks (ordinals
    /// `0..chunks_stored`) remain persisted.
    #[error(
        "ingestion of document {document_id} halted at chunk {failed_ordinal} \
         after storing {chunks_stored} chunk(s): {source}"
    )]
    PartialIngestion {
        document_id: String,
        chunks_stored: usize,
        failed_ordinal: i64,
        #[source]
        source: Box<RecallError>,
    },

    /// The document bytes could not be turned into text.
    #[error("text extraction failed: {0}")]
    Extraction(String),

    /// Any other storage backend failure, including rows that fail
    /// validation on read.
    #[error("storage error: {0}")]
    Storage(String),

    /// A deferred task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),
}

impl RecallError {
    /// Whether repeating the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RecallError::EmbedderUnavailable(_)
            | RecallError::GenerationUnavailable(_)
            | RecallError::StorageConflict(_) => true,
            RecallError::PartialIngestion { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Failure reported by a single embedding call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbedError {
    /// HTTP 429 or equivalent.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Network failure or server-side error.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The call exceeded its time budget.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Malformed input. Fatal for this text.
    #[error("rejected: {0}")]
    Rejected(String),

    /// No embedding service is configured.
    #[error("embedding provider is disabled")]
    Disabled,
}

impl EmbedError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EmbedError::RateLimited(_) | EmbedError::Unavailable(_) | EmbedError::Timeout(_)
        )
    }
}

impl From<EmbedError> for RecallError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::Rejected(msg) => RecallError::EmbeddingRejected(msg),
            other => RecallError::EmbedderUnavailable(other.to_string()),
        }
    }
}
