//! Core data models used throughout Channel Recall.
//!
//! These types represent the documents, chunks, messages, and query results
//! that flow through the ingestion and retrieval pipelines. Storage
//! backends decode their rows into these records and reject rows that do
//! not fit them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Namespace for deterministic chunk ids.
const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x6c0f_3a52_9d1e_4b7a_a2f4_0e8b_51c7_d930);

/// An uploaded document. Created by the upload collaborator; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    /// Owning channel, if the document was uploaded into one.
    pub channel_id: Option<String>,
}

/// Everything stored alongside a chunk's embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    /// 0-based position within the document.
    pub ordinal: i64,
    pub text: String,
    /// Retrieval scope.
    pub channel_id: Option<String>,
    /// 1-based PDF page the text came from.
    pub page: Option<u32>,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A stored chunk: metadata plus its embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub ordinal: i64,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub text: String,
    pub channel_id: Option<String>,
    pub page: Option<u32>,
    pub hash: String,
}

impl Chunk {
    pub fn from_parts(id: &str, embedding: &[f32], meta: &ChunkMetadata) -> Self {
        Self {
            id: id.to_string(),
            document_id: meta.document_id.clone(),
            ordinal: meta.ordinal,
            embedding: embedding.to_vec(),
            text: meta.text.clone(),
            channel_id: meta.channel_id.clone(),
            page: meta.page,
            hash: meta.hash.clone(),
        }
    }
}

/// Deterministic chunk id for a `(document_id, ordinal)` position.
///
/// Re-ingesting the same document produces the same ids, so upserts
/// replace rather than duplicate.
///
/// ```
/// use channel_recall_core::models::chunk_id;
///
/// assert_eq!(chunk_id("doc-1", 0), chunk_id("doc-1", 0));
/// assert_ne!(chunk_id("doc-1", 0), chunk_id("doc-1", 1));
/// ```
pub fn chunk_id(document_id: &str, ordinal: i64) -> String {
    let name = format!("{}:{}", document_id, ordinal);
    Uuid::new_v5(&CHUNK_NAMESPACE, name.as_bytes()).to_string()
}

/// One nearest-neighbor result.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkHit {
    pub chunk: Chunk,
    /// Cosine distance, `0.0` for an exact match.
    pub distance: f32,
}

/// A chat message. Owned by the messaging collaborator; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub sender: String,
    pub sent: DateTime<Utc>,
    pub text: Option<String>,
    pub content: Option<String>,
}

impl Message {
    /// The displayable body: `content`, falling back to `text`.
    pub fn body(&self) -> &str {
        self.content
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(self.text.as_deref())
            .unwrap_or("")
    }
}

/// A substring match with its conversational neighbors.
#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    pub message: Message,
    pub channel_name: Option<String>,
    pub previous_message: Option<Message>,
    pub next_message: Option<Message>,
    /// Always `1.0`; matches are ordered by recency only.
    pub score: f64,
}

/// One retrieved chunk inside a [`ContextBundle`].
#[derive(Debug, Clone, Serialize)]
pub struct ContextPassage {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: i64,
    pub page: Option<u32>,
    pub text: String,
    pub distance: f32,
}

impl From<ChunkHit> for ContextPassage {
    fn from(hit: ChunkHit) -> Self {
        Self {
            chunk_id: hit.chunk.id,
            document_id: hit.chunk.document_id,
            ordinal: hit.chunk.ordinal,
            page: hit.chunk.page,
            text: hit.chunk.text,
            distance: hit.distance,
        }
    }
}

/// Retrieved chunk texts, in ranking order, grounding an answer.
#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    pub query: String,
    pub passages: Vec<ContextPassage>,
}

impl ContextBundle {
    /// Render passages as numbered `# Result n` sections.
    pub fn render(&self) -> String {
        let parts: Vec<String> = self
            .passages
            .iter()
            .enumerate()
            .map(|(n, p)| format!("# Result {}\n{}", n, p.text))
            .collect();
        format!("Search results from documents:\n{}", parts.join("\n"))
    }
}

/// Result of a RAG query. An empty retrieval is a normal outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RagOutcome {
    Context(ContextBundle),
    NoRelevantContent,
}

impl RagOutcome {
    pub fn bundle(&self) -> Option<&ContextBundle> {
        match self {
            RagOutcome::Context(b) => Some(b),
            RagOutcome::NoRelevantContent => None,
        }
    }
}
