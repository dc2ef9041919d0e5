//! Storage abstraction for Channel Recall.
//!
//! Three traits split the storage backend by concern:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`VectorIndex`] | Persist chunk embeddings and answer nearest-neighbor queries |
//! | [`MessageHistory`] | Read-only access to chat messages for substring search and neighbor lookup |
//! | [`DocumentSource`] | Resolve a document id to its metadata and raw bytes |
//!
//! Implementations must be `Send + Sync` to work with async runtimes. The
//! engine holds no mutable state of its own; every constraint (such as the
//! `(document_id, ordinal)` uniqueness) is enforced here.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RecallError;
use crate::models::{ChunkHit, ChunkMetadata, Document, Message};

/// Upper bound for `k` in [`VectorIndex::query_nearest`].
pub const MAX_K: usize = 100;

/// Whether `message` text or content contains `needle`, which must already
/// be lowercased. Folding uses full Unicode case mapping.
pub fn message_contains_folded(message: &Message, needle: &str) -> bool {
    [message.text.as_deref(), message.content.as_deref()]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(needle))
}

/// Clamp a requested neighbor count to `[1, MAX_K]`.
pub fn clamp_k(k: usize) -> usize {
    k.clamp(1, MAX_K)
}

/// Nearest-neighbor index over fixed-dimension chunk embeddings.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Insert or replace one chunk |
/// | [`query_nearest`](VectorIndex::query_nearest) | Ranked neighbors, optionally scoped to a channel |
/// | [`count_chunks`](VectorIndex::count_chunks) | Stored chunks for a document |
/// | [`prune_document`](VectorIndex::prune_document) | Drop ordinals past a new chunk count |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// The process-wide embedding dimension.
    fn dimension(&self) -> usize;

    /// Insert or replace the chunk keyed by `chunk_id` (equivalently by
    /// `(metadata.document_id, metadata.ordinal)`).
    ///
    /// Fails with [`RecallError::DimensionMismatch`] when
    /// `embedding.len() != self.dimension()`.
    async fn upsert(
        &self,
        chunk_id: &str,
        embedding: &[f32],
        metadata: &ChunkMetadata,
    ) -> Result<(), RecallError>;

    /// Return up to `clamp_k(k)` chunks by ascending cosine distance, ties
    /// broken by chunk id. With a `scope`, only chunks whose `channel_id`
    /// equals it are ranked.
    async fn query_nearest(
        &self,
        embedding: &[f32],
        k: usize,
        scope: Option<&str>,
    ) -> Result<Vec<ChunkHit>, RecallError>;

    /// Number of chunks stored for a document.
    async fn count_chunks(&self, document_id: &str) -> Result<usize, RecallError>;

    /// Delete chunks of `document_id` with `ordinal >= keep`. Returns the
    /// number deleted.
    async fn prune_document(&self, document_id: &str, keep: usize) -> Result<u64, RecallError>;
}

/// Read access to the message stream owned by the messaging subsystem.
#[async_trait]
pub trait MessageHistory: Send + Sync {
    /// Messages whose `text` or `content` contains `query`,
    /// case-insensitively, newest first (ties by id descending), at most
    /// `limit`.
    async fn find_messages(
        &self,
        query: &str,
        channel_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>, RecallError>;

    /// The message in `message.channel_id` with the greatest `sent`
    /// strictly before `message.sent`.
    async fn previous_message(&self, message: &Message) -> Result<Option<Message>, RecallError>;

    /// The message in `message.channel_id` with the least `sent` strictly
    /// after `message.sent`.
    async fn next_message(&self, message: &Message) -> Result<Option<Message>, RecallError>;

    /// Display name of a channel.
    async fn channel_name(&self, channel_id: &str) -> Result<Option<String>, RecallError>;

    /// Messages sent at or after `since`, oldest first.
    async fn messages_since(
        &self,
        channel_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, RecallError>;
}

/// Resolves uploaded documents. Blob storage mechanics live behind this.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn get_document(&self, id: &str) -> Result<Option<Document>, RecallError>;

    async fn read_bytes(&self, document: &Document) -> Result<Vec<u8>, RecallError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_k_bounds() {
        assert_eq!(clamp_k(0), 1);
        assert_eq!(clamp_k(3), 3);
        assert_eq!(clamp_k(MAX_K + 50), MAX_K);
    }

    #[test]
    fn folded_match_covers_text_and_content() {
        let mut message = Message {
            id: "m".into(),
            channel_id: "c".into(),
            sender: "ana".into(),
            sent: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            text: Some("Über das Café".into()),
            content: None,
        };
        assert!(message_contains_folded(&message, "über"));
        assert!(message_contains_folded(&message, &"CAFÉ".to_lowercase()));
        assert!(!message_contains_folded(&message, "tee"));

        message.text = None;
        message.content = Some("<b>Ærøskøbing</b>".into());
        assert!(message_contains_folded(&message, "ærø"));
    }
}
