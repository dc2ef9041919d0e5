//! In-memory store for tests and embedding hosts without a database.
//!
//! Implements all three storage traits using `HashMap` and `Vec` behind
//! `std::sync::RwLock`. Vector search is brute force over the chunks in
//! scope. Substring matching lowercases with full Unicode folding.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::embedding::ensure_dimension;
use crate::error::RecallError;
use crate::models::{Chunk, ChunkHit, ChunkMetadata, Document, Message};
use crate::search::rank_nearest;

use super::{message_contains_folded, DocumentSource, MessageHistory, VectorIndex};

/// In-memory backend. Every method takes `&self`; locks are held only for
/// the duration of one call.
pub struct InMemoryStore {
    dims: usize,
    /// Keyed by `(document_id, ordinal)`.
    chunks: RwLock<HashMap<(String, i64), Chunk>>,
    channels: RwLock<HashMap<String, String>>,
    messages: RwLock<Vec<Message>>,
    documents: RwLock<HashMap<String, (Document, Vec<u8>)>>,
}

fn poisoned<T>(_: PoisonError<T>) -> RecallError {
    RecallError::Storage("in-memory store lock poisoned".to_string())
}

impl InMemoryStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            chunks: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            messages: RwLock::new(Vec::new()),
            documents: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_channel(&self, id: &str, name: &str) -> Result<(), RecallError> {
        self.channels
            .write()
            .map_err(poisoned)?
            .insert(id.to_string(), name.to_string());
        Ok(())
    }

    pub fn add_message(&self, message: Message) -> Result<(), RecallError> {
        self.messages.write().map_err(poisoned)?.push(message);
        Ok(())
    }

    pub fn add_document(&self, document: Document, bytes: Vec<u8>) -> Result<(), RecallError> {
        self.documents
            .write()
            .map_err(poisoned)?
            .insert(document.id.clone(), (document, bytes));
        Ok(())
    }

    /// All chunks of a document, ordered by ordinal.
    pub fn chunks_for(&self, document_id: &str) -> Result<Vec<Chunk>, RecallError> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        let mut out: Vec<Chunk> = chunks
            .values()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.ordinal);
        Ok(out)
    }
}

#[async_trait]
impl VectorIndex for InMemoryStore {
    fn dimension(&self) -> usize {
        self.dims
    }

    async fn upsert(
        &self,
        chunk_id: &str,
        embedding: &[f32],
        metadata: &ChunkMetadata,
    ) -> Result<(), RecallError> {
        ensure_dimension(self.dims, embedding)?;
        let mut chunks = self.chunks.write().map_err(poisoned)?;
        chunks.retain(|key, c| {
            c.id != chunk_id || *key == (metadata.document_id.clone(), metadata.ordinal)
        });
        chunks.insert(
            (metadata.document_id.clone(), metadata.ordinal),
            Chunk::from_parts(chunk_id, embedding, metadata),
        );
        Ok(())
    }

    async fn query_nearest(
        &self,
        embedding: &[f32],
        k: usize,
        scope: Option<&str>,
    ) -> Result<Vec<ChunkHit>, RecallError> {
        ensure_dimension(self.dims, embedding)?;
        let chunks = self.chunks.read().map_err(poisoned)?;
        let in_scope = chunks
            .values()
            .filter(|c| match scope {
                Some(s) => c.channel_id.as_deref() == Some(s),
                None => true,
            })
            .cloned();
        Ok(rank_nearest(embedding, in_scope, k))
    }

    async fn count_chunks(&self, document_id: &str) -> Result<usize, RecallError> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        Ok(chunks.keys().filter(|(d, _)| d == document_id).count())
    }

    async fn prune_document(&self, document_id: &str, keep: usize) -> Result<u64, RecallError> {
        let mut chunks = self.chunks.write().map_err(poisoned)?;
        let before = chunks.len();
        chunks.retain(|(d, ordinal), _| d != document_id || *ordinal < keep as i64);
        Ok((before - chunks.len()) as u64)
    }
}

#[async_trait]
impl MessageHistory for InMemoryStore {
    async fn find_messages(
        &self,
        query: &str,
        channel_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>, RecallError> {
        let needle = query.to_lowercase();
        let messages = self.messages.read().map_err(poisoned)?;
        let mut found: Vec<Message> = messages
            .iter()
            .filter(|m| channel_id.map_or(true, |c| m.channel_id == c))
            .filter(|m| message_contains_folded(m, &needle))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.sent.cmp(&a.sent).then_with(|| b.id.cmp(&a.id)));
        found.truncate(limit);
        Ok(found)
    }

    async fn previous_message(&self, message: &Message) -> Result<Option<Message>, RecallError> {
        let messages = self.messages.read().map_err(poisoned)?;
        Ok(messages
            .iter()
            .filter(|m| m.channel_id == message.channel_id && m.sent < message.sent)
            .max_by(|a, b| a.sent.cmp(&b.sent).then_with(|| a.id.cmp(&b.id)))
            .cloned())
    }

    async fn next_message(&self, message: &Message) -> Result<Option<Message>, RecallError> {
        let messages = self.messages.read().map_err(poisoned)?;
        Ok(messages
            .iter()
            .filter(|m| m.channel_id == message.channel_id && m.sent > message.sent)
            .min_by(|a, b| a.sent.cmp(&b.sent).then_with(|| a.id.cmp(&b.id)))
            .cloned())
    }

    async fn channel_name(&self, channel_id: &str) -> Result<Option<String>, RecallError> {
        let channels = self.channels.read().map_err(poisoned)?;
        Ok(channels.get(channel_id).cloned())
    }

    async fn messages_since(
        &self,
        channel_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, RecallError> {
        let messages = self.messages.read().map_err(poisoned)?;
        let mut out: Vec<Message> = messages
            .iter()
            .filter(|m| channel_id.map_or(true, |c| m.channel_id == c))
            .filter(|m| m.sent >= since)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.sent.cmp(&b.sent).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[async_trait]
impl DocumentSource for InMemoryStore {
    async fn get_document(&self, id: &str) -> Result<Option<Document>, RecallError> {
        let documents = self.documents.read().map_err(poisoned)?;
        Ok(documents.get(id).map(|(d, _)| d.clone()))
    }

    async fn read_bytes(&self, document: &Document) -> Result<Vec<u8>, RecallError> {
        let documents = self.documents.read().map_err(poisoned)?;
        documents
            .get(&document.id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| RecallError::NotFound(format!("document {}", document.id)))
    }
}
