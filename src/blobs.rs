//! Filesystem-backed [`DocumentSource`].
//!
//! Document rows live in the `documents` table; the bytes live in one file
//! per document id under the configured blob directory. `recall register`
//! stands in for upload completion by copying a local file here and
//! recording its row.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use channel_recall_core::models::Document;
use channel_recall_core::store::DocumentSource;
use channel_recall_core::RecallError;

use crate::config::Config;
use crate::db;
use crate::extract::{is_supported, MIME_MARKDOWN, MIME_PDF, MIME_TEXT};
use crate::sqlite_store::storage_error;

pub struct FsDocumentSource {
    pool: SqlitePool,
    blob_dir: PathBuf,
}

impl FsDocumentSource {
    pub fn new(pool: SqlitePool, blob_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            blob_dir: blob_dir.into(),
        }
    }

    pub fn blob_path(&self, document_id: &str) -> PathBuf {
        self.blob_dir.join(document_id)
    }

    /// Store `bytes` for `document` and record its row.
    pub async fn put(&self, document: &Document, bytes: &[u8]) -> Result<(), RecallError> {
        tokio::fs::create_dir_all(&self.blob_dir)
            .await
            .map_err(|e| io_error(&self.blob_dir, e))?;
        let path = self.blob_path(&document.id);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| io_error(&path, e))?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, content_type, size, channel_id)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size = excluded.size,
                channel_id = excluded.channel_id
            "#,
        )
        .bind(&document.id)
        .bind(&document.filename)
        .bind(&document.content_type)
        .bind(document.size)
        .bind(&document.channel_id)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error(&format!("record document {}", document.id), e))?;

        Ok(())
    }
}

/// Content type implied by a file extension, if it is one we extract.
pub fn guess_content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" | "text" | "log" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        "pdf" => Some(MIME_PDF),
        _ => None,
    }
}

/// `recall register <file>`: copy a local file into the blob directory and
/// record it as an uploaded document. Prints the new document id.
pub async fn run_register(
    config: &Config,
    file: &Path,
    content_type: Option<&str>,
    channel: Option<&str>,
) -> anyhow::Result<()> {
    let content_type = match content_type.or_else(|| guess_content_type(file)) {
        Some(ct) => ct.to_string(),
        None => anyhow::bail!(
            "Cannot infer content type of {}; pass --content-type",
            file.display()
        ),
    };
    if !is_supported(&content_type) {
        warn!(content_type = %content_type, "registering a document that cannot be ingested");
    }

    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let document = Document {
        id: Uuid::new_v4().to_string(),
        filename,
        content_type,
        size: bytes.len() as i64,
        channel_id: channel.map(String::from),
    };

    let pool = db::connect(config).await?;
    let source = FsDocumentSource::new(pool.clone(), config.blob_dir());
    let result = source.put(&document, &bytes).await;
    pool.close().await;
    result?;

    println!("{}", document.id);
    Ok(())
}

fn io_error(path: &Path, err: std::io::Error) -> RecallError {
    RecallError::Storage(format!("{}: {}", path.display(), err))
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn get_document(&self, id: &str) -> Result<Option<Document>, RecallError> {
        let row = sqlx::query(
            "SELECT id, filename, content_type, size, channel_id FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error(&format!("load document {}", id), e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let decode = |e: sqlx::Error| RecallError::Storage(format!("malformed document row: {}", e));
        Ok(Some(Document {
            id: row.try_get("id").map_err(decode)?,
            filename: row.try_get("filename").map_err(decode)?,
            content_type: row.try_get("content_type").map_err(decode)?,
            size: row.try_get("size").map_err(decode)?,
            channel_id: row.try_get("channel_id").map_err(decode)?,
        }))
    }

    async fn read_bytes(&self, document: &Document) -> Result<Vec<u8>, RecallError> {
        let path = self.blob_path(&document.id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RecallError::NotFound(
                format!("bytes for document {}", document.id),
            )),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn source() -> (TempDir, FsDocumentSource) {
        let tmp = TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", tmp.path().join("t.sqlite").display());
        let pool = SqlitePoolOptions::new().connect(&url).await.unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        let blobs = tmp.path().join("blobs");
        (tmp, FsDocumentSource::new(pool, blobs))
    }

    #[tokio::test]
    async fn test_put_then_read() {
        let (_tmp, src) = source().await;
        let doc = Document {
            id: "doc-1".into(),
            filename: "plan.md".into(),
            content_type: "text/markdown".into(),
            size: 6,
            channel_id: Some("c1".into()),
        };
        src.put(&doc, b"# Plan").await.unwrap();

        let loaded = src.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(loaded, doc);
        assert_eq!(src.read_bytes(&loaded).await.unwrap(), b"# Plan");
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type(Path::new("a/notes.MD")), Some(MIME_MARKDOWN));
        assert_eq!(guess_content_type(Path::new("report.pdf")), Some(MIME_PDF));
        assert_eq!(guess_content_type(Path::new("log.txt")), Some(MIME_TEXT));
        assert_eq!(guess_content_type(Path::new("photo.png")), None);
        assert_eq!(guess_content_type(Path::new("README")), None);
    }

    #[tokio::test]
    async fn test_missing_document_and_bytes() {
        let (_tmp, src) = source().await;
        assert!(src.get_document("nope").await.unwrap().is_none());

        let ghost = Document {
            id: "ghost".into(),
            filename: "x".into(),
            content_type: "text/plain".into(),
            size: 0,
            channel_id: None,
        };
        assert!(matches!(
            src.read_bytes(&ghost).await,
            Err(RecallError::NotFound(_))
        ));
    }
}
