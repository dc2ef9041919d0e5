//! Overlapping, boundary-aware text chunker.
//!
//! Splits extracted document text into windows of at most `max_chars`
//! characters. Adjacent windows share exactly `overlap_chars` characters so
//! context survives a cut point; the final window simply runs to the end
//! of the text.
//!
//! # Algorithm
//!
//! 1. Reject `max_chars == 0`, `overlap_chars == 0`, or
//!    `overlap_chars >= max_chars` with [`RecallError::Configuration`].
//! 2. If the remaining text fits in one window, emit it and stop.
//! 3. Otherwise look backwards from the window end for the best cut:
//!    paragraph break (`\n\n`), then line break or sentence end, then any
//!    whitespace. The search never goes below half a window (or below
//!    `overlap_chars + 1`), so every step advances.
//! 4. If no boundary exists, hard-cut at `max_chars`.
//! 5. The next window starts `overlap_chars` before the cut.
//!
//! Lengths are counted in `char`s, so multibyte text is never split inside
//! a character. The function is pure: equal inputs give equal outputs,
//! which makes re-ingestion idempotent.
//!
//! # Example
//!
//! ```rust
//! use channel_recall_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("Hello world.\n\nSecond paragraph.", 4000, 500).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].ordinal, 0);
//! ```

use sha2::{Digest, Sha256};

use crate::error::RecallError;

/// Default window size in characters.
pub const DEFAULT_MAX_CHARS: usize = 4000;
/// Default overlap between adjacent windows in characters.
pub const DEFAULT_OVERLAP_CHARS: usize = 500;

/// One window produced by [`chunk_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Contiguous, starting at 0.
    pub ordinal: i64,
    pub text: String,
}

/// Check chunking parameters without chunking anything.
pub fn validate_params(max_chars: usize, overlap_chars: usize) -> Result<(), RecallError> {
    if max_chars == 0 || overlap_chars == 0 {
        return Err(RecallError::Configuration(format!(
            "max_chars ({}) and overlap_chars ({}) must both be positive",
            max_chars, overlap_chars
        )));
    }
    if overlap_chars >= max_chars {
        return Err(RecallError::Configuration(format!(
            "overlap_chars ({}) must be smaller than max_chars ({})",
            overlap_chars, max_chars
        )));
    }
    Ok(())
}

/// Split `text` into overlapping windows.
///
/// # Guarantees
///
/// - Empty or whitespace-only input yields no chunks.
/// - Every chunk has at most `max_chars` characters.
/// - Chunk `i + 1` begins with the last `overlap_chars` characters of chunk `i`.
/// - Concatenating the first chunk with every later chunk minus its
///   overlap prefix reproduces `text` exactly.
pub fn chunk_text(
    text: &str,
    max_chars: usize,
    overlap_chars: usize,
) -> Result<Vec<TextChunk>, RecallError> {
    validate_params(max_chars, overlap_chars)?;

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let min_advance = (max_chars / 2).max(overlap_chars + 1);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut ordinal: i64 = 0;

    loop {
        if total - start <= max_chars {
            chunks.push(make_chunk(ordinal, &chars[start..]));
            break;
        }

        let window_end = start + max_chars;
        let cut = find_cut(&chars, start + min_advance, window_end);
        chunks.push(make_chunk(ordinal, &chars[start..cut]));
        ordinal += 1;
        start = cut - overlap_chars;
    }

    Ok(chunks)
}

/// Pick a cut position `p` in `floor..=end`; the chunk is `chars[..p]`.
fn find_cut(chars: &[char], floor: usize, end: usize) -> usize {
    let is_paragraph = |p: usize| p >= 2 && chars[p - 1] == '\n' && chars[p - 2] == '\n';
    let is_sentence = |p: usize| {
        chars[p - 1] == '\n'
            || (p >= 2 && chars[p - 1].is_whitespace() && matches!(chars[p - 2], '.' | '!' | '?'))
    };
    let is_space = |p: usize| chars[p - 1].is_whitespace();

    for accept in [&is_paragraph as &dyn Fn(usize) -> bool, &is_sentence, &is_space] {
        if let Some(p) = (floor..=end).rev().find(|&p| accept(p)) {
            return p;
        }
    }
    end
}

fn make_chunk(ordinal: i64, chars: &[char]) -> TextChunk {
    TextChunk {
        ordinal,
        text: chars.iter().collect(),
    }
}

/// SHA-256 of a chunk's text, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
