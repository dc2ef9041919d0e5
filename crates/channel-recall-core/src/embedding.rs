//! Embedder trait and vector utilities.
//!
//! Defines the [`Embedder`] boundary that every embedding backend
//! implements, plus pure helpers for vector serialization, dimension
//! checks, and cosine similarity/distance.
//!
//! Concrete HTTP providers (OpenAI, Ollama) live in the `channel-recall`
//! app crate. Retry and timeout policy is owned by the orchestrator, so a
//! provider performs exactly one attempt per call.

use async_trait::async_trait;

use crate::error::{EmbedError, RecallError};

/// An external embedding service: `embed(text) -> fixed-length vector`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed one text. A single attempt; no retries.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Fail with [`RecallError::DimensionMismatch`] unless `embedding` has
/// exactly `expected` components.
pub fn ensure_dimension(expected: usize, embedding: &[f32]) -> Result<(), RecallError> {
    if embedding.len() != expected {
        return Err(RecallError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use channel_recall_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob).unwrap(), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Returns `None` if the length is not a multiple of 4, so a corrupt row
/// is reported instead of silently truncated.
pub fn blob_to_vec(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, or zero-norm vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance, `1 - cosine_similarity`, clamped to `[0.0, 2.0]`.
///
/// Identical vectors are at distance exactly `0.0`, including zero
/// vectors, so a stored chunk is always nearest to its own embedding.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a == b {
        return 0.0;
    }
    (1.0 - cosine_similarity(a, b)).clamp(0.0, 2.0)
}
