//! Text extraction for uploaded documents.
//!
//! Supplies the first stage of ingestion: raw bytes plus a declared content
//! type in, a list of text [`Segment`]s out. Plain text and markdown pass
//! through unchanged as one segment; PDFs yield one segment per page tagged
//! with its 1-based page number.

use channel_recall_core::RecallError;

/// Supported content types.
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";

/// A contiguous run of extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// 1-based PDF page, `None` for text formats.
    pub page: Option<u32>,
    pub text: String,
}

/// Normalize a declared content type: drop parameters such as
/// `; charset=utf-8`, trim, lowercase.
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Whether [`extract_segments`] accepts this content type.
pub fn is_supported(content_type: &str) -> bool {
    matches!(
        essence(content_type).as_str(),
        MIME_TEXT | MIME_MARKDOWN | MIME_PDF
    )
}

/// Extract text segments from `bytes`.
///
/// Fails with [`RecallError::UnsupportedMediaType`] for any content type
/// other than plain text, markdown, or PDF, and with
/// [`RecallError::Extraction`] when the bytes cannot be decoded.
pub fn extract_segments(bytes: &[u8], content_type: &str) -> Result<Vec<Segment>, RecallError> {
    match essence(content_type).as_str() {
        MIME_TEXT | MIME_MARKDOWN => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| RecallError::Extraction(format!("text is not valid UTF-8: {}", e)))?;
            Ok(vec![Segment {
                page: None,
                text: text.to_string(),
            }])
        }
        MIME_PDF => extract_pdf(bytes),
        _ => Err(RecallError::UnsupportedMediaType(content_type.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<Segment>, RecallError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| RecallError::Extraction(format!("PDF extraction failed: {}", e)))?;
    Ok(pages_to_segments(pages))
}

/// Tag page texts with 1-based page numbers.
fn pages_to_segments(pages: Vec<String>) -> Vec<Segment> {
    pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| Segment {
            page: Some(i as u32 + 1),
            text,
        })
        .collect()
}
