//! Ingestion pipeline: extract → chunk → embed → upsert.
//!
//! Ingestion is deliberately not atomic. Chunks are embedded and stored one
//! at a time in ordinal order; the first failure halts the run and is
//! reported as [`RecallError::PartialIngestion`] with the number of chunks
//! already stored. Because chunking is deterministic and chunk ids derive
//! from `(document_id, ordinal)`, re-running ingestion replaces the stored
//! prefix in place and resumes where the last run stopped.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use channel_recall_core::chunk::{chunk_text, content_hash};
use channel_recall_core::models::{chunk_id, ChunkMetadata};
use channel_recall_core::RecallError;

use crate::config::Config;
use crate::engine::{RetrievalEngine, Services};
use crate::extract::{extract_segments, Segment};

/// Outcome of a fully successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks_stored: usize,
    /// Stale chunks from a longer previous version that were removed.
    pub pruned: u64,
}

/// Chunk every segment and number the pieces continuously across segments.
fn plan_chunks(
    document_id: &str,
    segments: &[Segment],
    channel_id: Option<&str>,
    max_chars: usize,
    overlap_chars: usize,
) -> Result<Vec<ChunkMetadata>, RecallError> {
    let mut planned = Vec::new();
    for segment in segments {
        for piece in chunk_text(&segment.text, max_chars, overlap_chars)? {
            planned.push(ChunkMetadata {
                document_id: document_id.to_string(),
                ordinal: planned.len() as i64,
                hash: content_hash(&piece.text),
                text: piece.text,
                channel_id: channel_id.map(String::from),
                page: segment.page,
            });
        }
    }
    Ok(planned)
}

impl RetrievalEngine {
    /// Ingest an uploaded document by id.
    ///
    /// An explicit `channel_id` overrides the document's owning channel as
    /// the retrieval scope of every chunk.
    pub async fn ingest(
        &self,
        document_id: &str,
        channel_id: Option<&str>,
    ) -> Result<IngestReport, RecallError> {
        let document = self
            .documents
            .get_document(document_id)
            .await?
            .ok_or_else(|| RecallError::NotFound(format!("document {}", document_id)))?;
        let bytes = self.documents.read_bytes(&document).await?;
        let scope = channel_id.or(document.channel_id.as_deref());

        self.ingest_bytes(&document.id, bytes, &document.content_type, scope)
            .await
    }

    /// Ingest raw bytes with a declared content type.
    pub async fn ingest_bytes(
        &self,
        document_id: &str,
        bytes: Vec<u8>,
        content_type: &str,
        channel_id: Option<&str>,
    ) -> Result<IngestReport, RecallError> {
        info!(document_id, content_type, channel_id, "ingesting document");

        let declared = content_type.to_string();
        let segments = tokio::task::spawn_blocking(move || extract_segments(&bytes, &declared))
            .await
            .map_err(|e| RecallError::Extraction(format!("extraction task failed: {}", e)))??;

        let planned = plan_chunks(
            document_id,
            &segments,
            channel_id,
            self.settings.max_chars,
            self.settings.overlap_chars,
        )?;
        debug!(document_id, chunks = planned.len(), "chunked document");

        for (stored, meta) in planned.iter().enumerate() {
            if let Err(source) = self.store_chunk(meta).await {
                warn!(
                    document_id,
                    chunks_stored = stored,
                    failed_ordinal = meta.ordinal,
                    error = %source,
                    "ingestion halted"
                );
                return Err(RecallError::PartialIngestion {
                    document_id: document_id.to_string(),
                    chunks_stored: stored,
                    failed_ordinal: meta.ordinal,
                    source: Box::new(source),
                });
            }
        }

        let pruned = self
            .index
            .prune_document(document_id, planned.len())
            .await?;

        info!(
            document_id,
            chunks_stored = planned.len(),
            pruned,
            "ingestion complete"
        );
        Ok(IngestReport {
            document_id: document_id.to_string(),
            chunks_stored: planned.len(),
            pruned,
        })
    }

    async fn store_chunk(&self, meta: &ChunkMetadata) -> Result<(), RecallError> {
        let embedding = self.embed_with_retry(&meta.text).await?;
        let id = chunk_id(&meta.document_id, meta.ordinal);
        self.index.upsert(&id, &embedding, meta).await
    }
}

/// `recall ingest <document_id>`
pub async fn run_ingest(config: &Config, document_id: &str, channel: Option<&str>) -> Result<()> {
    let services = Services::connect(config).await?;
    let result = services.engine.ingest(document_id, channel).await;
    services.close().await;

    match result {
        Ok(report) => {
            println!("ingest {}", report.document_id);
            println!("  chunks stored: {}", report.chunks_stored);
            println!("  stale chunks pruned: {}", report.pruned);
            println!("ok");
            Ok(())
        }
        Err(RecallError::PartialIngestion {
            document_id,
            chunks_stored,
            failed_ordinal,
            source,
        }) => {
            println!("ingest {}", document_id);
            println!("  chunks stored: {}", chunks_stored);
            println!("  halted at chunk: {}", failed_ordinal);
            println!("  rerun `recall ingest {}` to resume", document_id);
            Err(anyhow::Error::new(*source)).with_context(|| {
                format!(
                    "ingestion of {} incomplete ({} chunk(s) stored)",
                    document_id, chunks_stored
                )
            })
        }
        Err(e) => Err(e).with_context(|| format!("Failed to ingest document {}", document_id)),
    }
}
