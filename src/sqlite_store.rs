//! SQLite-backed [`VectorIndex`] and [`MessageHistory`].
//!
//! Chunks live in the `chunks` table with their embedding stored as a
//! little-endian `f32` BLOB. The scope filter runs in SQL; cosine ranking
//! runs in Rust over the rows in scope. Messages are read from the
//! `messages` table, which the messaging subsystem owns; `sent` is stored
//! as microseconds since the epoch. Substring matching folds case in Rust,
//! since SQLite's `lower()` only maps ASCII.
//!
//! Rows are decoded into typed records and validated on read: a chunk
//! whose embedding does not match the configured dimension, or a message
//! whose timestamp is out of range, is reported as
//! [`RecallError::Storage`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use channel_recall_core::embedding::{blob_to_vec, ensure_dimension, vec_to_blob};
use channel_recall_core::models::{Chunk, ChunkHit, ChunkMetadata, Message};
use channel_recall_core::search::rank_nearest;
use channel_recall_core::store::{message_contains_folded, MessageHistory, VectorIndex};
use channel_recall_core::RecallError;

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CONSTRAINT: i32 = 19;

const MESSAGE_COLUMNS: &str = "id, channel_id, sender, sent, text, content";
const CHUNK_COLUMNS: &str = "id, document_id, ordinal, embedding, text, channel_id, page, hash";

/// Map a sqlx error to the engine taxonomy, prefixed with `context`.
///
/// Constraint violations and busy/locked databases become
/// [`RecallError::StorageConflict`]; everything else is
/// [`RecallError::Storage`].
pub fn storage_error(context: &str, err: sqlx::Error) -> RecallError {
    if let sqlx::Error::Database(db) = &err {
        let primary = db
            .code()
            .and_then(|c| c.parse::<i32>().ok())
            .map(|c| c & 0xff);
        if db.is_unique_violation() || matches!(
            primary,
            Some(SQLITE_BUSY | SQLITE_LOCKED | SQLITE_CONSTRAINT)
        ) {
            return RecallError::StorageConflict(format!("{}: {}", context, db));
        }
    }
    RecallError::Storage(format!("{}: {}", context, err))
}

/// Row counts reported by `recall stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub channels: i64,
    pub messages: i64,
    pub documents: i64,
    pub chunks: i64,
}

/// SQLite implementation of the storage traits.
///
/// Holds an explicitly constructed pool; whoever assembles the engine
/// owns its lifecycle.
pub struct SqliteStore {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn add_channel(&self, id: &str, name: &str) -> Result<(), RecallError> {
        sqlx::query(
            "INSERT INTO channels (id, name) VALUES (?, ?) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(id)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("insert channel", e))?;
        Ok(())
    }

    pub async fn add_message(&self, message: &Message) -> Result<(), RecallError> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, channel_id, sender, sent, text, content)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                channel_id = excluded.channel_id,
                sender = excluded.sender,
                sent = excluded.sent,
                text = excluded.text,
                content = excluded.content
            "#,
        )
        .bind(&message.id)
        .bind(&message.channel_id)
        .bind(&message.sender)
        .bind(message.sent.timestamp_micros())
        .bind(&message.text)
        .bind(&message.content)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error(&format!("insert message {}", message.id), e))?;
        Ok(())
    }

    /// All chunks of a document, ordered by ordinal.
    pub async fn chunks_for(&self, document_id: &str) -> Result<Vec<Chunk>, RecallError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE document_id = ? ORDER BY ordinal ASC",
            CHUNK_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("load chunks", e))?;

        rows.iter().map(|r| decode_chunk(r, self.dims)).collect()
    }

    pub async fn stats(&self) -> Result<StoreStats, RecallError> {
        let count = |table: &'static str| {
            let pool = self.pool.clone();
            async move {
                sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
                    .fetch_one(&pool)
                    .await
                    .map_err(|e| storage_error(&format!("count {}", table), e))
            }
        };
        Ok(StoreStats {
            channels: count("channels").await?,
            messages: count("messages").await?,
            documents: count("documents").await?,
            chunks: count("chunks").await?,
        })
    }
}

fn column_error(err: sqlx::Error) -> RecallError {
    RecallError::Storage(format!("malformed row: {}", err))
}

fn decode_chunk(row: &SqliteRow, dims: usize) -> Result<Chunk, RecallError> {
    let id: String = row.try_get("id").map_err(column_error)?;
    let blob: Vec<u8> = row.try_get("embedding").map_err(column_error)?;
    let embedding = blob_to_vec(&blob).ok_or_else(|| {
        RecallError::Storage(format!(
            "chunk {}: embedding blob of {} bytes is not a whole number of f32s",
            id,
            blob.len()
        ))
    })?;
    if embedding.len() != dims {
        return Err(RecallError::Storage(format!(
            "chunk {}: stored embedding has {} dimensions, index expects {}",
            id,
            embedding.len(),
            dims
        )));
    }
    let page: Option<i64> = row.try_get("page").map_err(column_error)?;
    let page = page
        .map(|p| {
            u32::try_from(p)
                .map_err(|_| RecallError::Storage(format!("chunk {}: invalid page {}", id, p)))
        })
        .transpose()?;

    Ok(Chunk {
        document_id: row.try_get("document_id").map_err(column_error)?,
        ordinal: row.try_get("ordinal").map_err(column_error)?,
        text: row.try_get("text").map_err(column_error)?,
        channel_id: row.try_get("channel_id").map_err(column_error)?,
        hash: row.try_get("hash").map_err(column_error)?,
        embedding,
        page,
        id,
    })
}

fn decode_message(row: &SqliteRow) -> Result<Message, RecallError> {
    let id: String = row.try_get("id").map_err(column_error)?;
    let sent_us: i64 = row.try_get("sent").map_err(column_error)?;
    let sent = DateTime::<Utc>::from_timestamp_micros(sent_us).ok_or_else(|| {
        RecallError::Storage(format!("message {}: timestamp {} out of range", id, sent_us))
    })?;
    Ok(Message {
        channel_id: row.try_get("channel_id").map_err(column_error)?,
        sender: row.try_get("sender").map_err(column_error)?,
        text: row.try_get("text").map_err(column_error)?,
        content: row.try_get("content").map_err(column_error)?,
        sent,
        id,
    })
}

#[async_trait]
impl VectorIndex for SqliteStore {
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
        let blob = vec_to_blob(embedding);

        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, ordinal, embedding, text, channel_id, page, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id, ordinal) DO UPDATE SET
                id = excluded.id,
                embedding = excluded.embedding,
                text = excluded.text,
                channel_id = excluded.channel_id,
                page = excluded.page,
                hash = excluded.hash
            "#,
        )
        .bind(chunk_id)
        .bind(&metadata.document_id)
        .bind(metadata.ordinal)
        .bind(&blob)
        .bind(&metadata.text)
        .bind(&metadata.channel_id)
        .bind(metadata.page.map(i64::from))
        .bind(&metadata.hash)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            storage_error(
                &format!(
                    "upsert chunk {} of document {}",
                    metadata.ordinal, metadata.document_id
                ),
                e,
            )
        })?;

        Ok(())
    }

    async fn query_nearest(
        &self,
        embedding: &[f32],
        k: usize,
        scope: Option<&str>,
    ) -> Result<Vec<ChunkHit>, RecallError> {
        ensure_dimension(self.dims, embedding)?;

        let rows = match scope {
            Some(channel) => {
                sqlx::query(&format!(
                    "SELECT {} FROM chunks WHERE channel_id = ?",
                    CHUNK_COLUMNS
                ))
                .bind(channel)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("SELECT {} FROM chunks", CHUNK_COLUMNS))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| storage_error("nearest-neighbor scan", e))?;

        let candidates = rows
            .iter()
            .map(|r| decode_chunk(r, self.dims))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rank_nearest(embedding, candidates, k))
    }

    async fn count_chunks(&self, document_id: &str) -> Result<usize, RecallError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("count chunks", e))?;
        Ok(n as usize)
    }

    async fn prune_document(&self, document_id: &str, keep: usize) -> Result<u64, RecallError> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ? AND ordinal >= ?")
            .bind(document_id)
            .bind(keep as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error(&format!("prune document {}", document_id), e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MessageHistory for SqliteStore {
    async fn find_messages(
        &self,
        query: &str,
        channel_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>, RecallError> {
        let needle = query.to_lowercase();
        let rows = sqlx::query(&format!(
            "SELECT {} FROM messages \
             WHERE (text IS NOT NULL OR content IS NOT NULL) \
               AND (? IS NULL OR channel_id = ?) \
             ORDER BY sent DESC, id DESC",
            MESSAGE_COLUMNS
        ))
        .bind(channel_id)
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("message substring search", e))?;

        let mut found = Vec::new();
        for row in &rows {
            if found.len() >= limit {
                break;
            }
            let message = decode_message(row)?;
            if message_contains_folded(&message, &needle) {
                found.push(message);
            }
        }
        Ok(found)
    }

    async fn previous_message(&self, message: &Message) -> Result<Option<Message>, RecallError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE channel_id = ? AND sent < ? \
             ORDER BY sent DESC, id DESC LIMIT 1",
            MESSAGE_COLUMNS
        ))
        .bind(&message.channel_id)
        .bind(message.sent.timestamp_micros())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error(&format!("previous message of {}", message.id), e))?;

        row.as_ref().map(decode_message).transpose()
    }

    async fn next_message(&self, message: &Message) -> Result<Option<Message>, RecallError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE channel_id = ? AND sent > ? \
             ORDER BY sent ASC, id ASC LIMIT 1",
            MESSAGE_COLUMNS
        ))
        .bind(&message.channel_id)
        .bind(message.sent.timestamp_micros())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error(&format!("next message of {}", message.id), e))?;

        row.as_ref().map(decode_message).transpose()
    }

    async fn channel_name(&self, channel_id: &str) -> Result<Option<String>, RecallError> {
        sqlx::query_scalar("SELECT name FROM channels WHERE id = ?")
            .bind(channel_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("channel name", e))
    }

    async fn messages_since(
        &self,
        channel_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, RecallError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE sent >= ? AND (? IS NULL OR channel_id = ?) \
             ORDER BY sent ASC, id ASC",
            MESSAGE_COLUMNS
        ))
        .bind(since.timestamp_micros())
        .bind(channel_id)
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("recent messages", e))?;

        rows.iter().map(decode_message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use channel_recall_core::chunk::content_hash;
    use channel_recall_core::models::chunk_id;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn open(dims: usize) -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", tmp.path().join("t.sqlite").display());
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool, dims))
    }

    fn meta(doc: &str, ordinal: i64, channel: Option<&str>) -> ChunkMetadata {
        let text = format!("{} chunk {}", doc, ordinal);
        ChunkMetadata {
            document_id: doc.into(),
            ordinal,
            hash: content_hash(&text),
            text,
            channel_id: channel.map(String::from),
            page: Some(1),
        }
    }

    fn msg(id: &str, channel: &str, us: i64, text: &str) -> Message {
        Message {
            id: id.into(),
            channel_id: channel.into(),
            sender: "ana".into(),
            sent: DateTime::<Utc>::from_timestamp_micros(us).unwrap(),
            text: Some(text.into()),
            content: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_position() {
        let (_tmp, store) = open(2).await;
        let m = meta("d", 0, Some("c"));
        store.upsert(&chunk_id("d", 0), &[1.0, 0.0], &m).await.unwrap();
        store.upsert(&chunk_id("d", 0), &[0.0, 1.0], &m).await.unwrap();

        let chunks = store.chunks_for("d").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].embedding, vec![0.0, 1.0]);
        assert_eq!(chunks[0].page, Some(1));
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let (_tmp, store) = open(3).await;
        let err = store
            .upsert("x", &[1.0], &meta("d", 0, None))
            .await
            .unwrap_err();
        assert!(matches!(err, RecallError::DimensionMismatch { .. }));
        assert_eq!(store.count_chunks("d").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_conflicting_chunk_id_is_storage_conflict() {
        let (_tmp, store) = open(1).await;
        store.upsert("same", &[1.0], &meta("d", 0, None)).await.unwrap();
        let err = store
            .upsert("same", &[1.0], &meta("d", 1, None))
            .await
            .unwrap_err();
        assert!(matches!(err, RecallError::StorageConflict(_)), "{:?}", err);
        assert_eq!(store.count_chunks("d").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scoped_nearest_and_self_match() {
        let (_tmp, store) = open(2).await;
        for i in 0..6 {
            store
                .upsert(&chunk_id("a", i), &[1.0, i as f32], &meta("a", i, Some("ops")))
                .await
                .unwrap();
        }
        store
            .upsert(&chunk_id("b", 0), &[-1.0, 0.5], &meta("b", 0, Some("design")))
            .await
            .unwrap();

        let hits = store.query_nearest(&[1.0, 3.0], 1, None).await.unwrap();
        assert_eq!(hits[0].chunk.id, chunk_id("a", 3));
        assert_eq!(hits[0].distance, 0.0);

        let scoped = store
            .query_nearest(&[1.0, 0.0], 5, Some("design"))
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].chunk.document_id, "b");
    }

    #[tokio::test]
    async fn test_exact_embedding_ranks_first_among_parallel_vectors() {
        let (_tmp, store) = open(2).await;
        let (low, high) = {
            let (a, b) = (chunk_id("a", 0), chunk_id("b", 0));
            if a < b { ("a", "b") } else { ("b", "a") }
        };
        store
            .upsert(&chunk_id(low, 0), &[3.0, 3.0], &meta(low, 0, None))
            .await
            .unwrap();
        store
            .upsert(&chunk_id(high, 0), &[1.0, 1.0], &meta(high, 0, None))
            .await
            .unwrap();

        let hits = store.query_nearest(&[1.0, 1.0], 1, None).await.unwrap();
        assert_eq!(hits[0].chunk.id, chunk_id(high, 0));
        assert_eq!(hits[0].distance, 0.0);
    }

    #[tokio::test]
    async fn test_corrupt_embedding_row_is_reported() {
        let (_tmp, store) = open(2).await;
        sqlx::query(
            "INSERT INTO chunks (id, document_id, ordinal, embedding, text, hash) \
             VALUES ('bad', 'd', 0, x'000102', 't', 'h')",
        )
        .execute(store.pool())
        .await
        .unwrap();
        let err = store.query_nearest(&[1.0, 0.0], 3, None).await.unwrap_err();
        assert!(matches!(err, RecallError::Storage(_)));
    }

    #[tokio::test]
    async fn test_prune_document() {
        let (_tmp, store) = open(1).await;
        for i in 0..4 {
            store
                .upsert(&chunk_id("d", i), &[1.0], &meta("d", i, None))
                .await
                .unwrap();
        }
        assert_eq!(store.prune_document("d", 1).await.unwrap(), 3);
        assert_eq!(store.count_chunks("d").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_messages_case_insensitive_and_neighbors() {
        let (_tmp, store) = open(1).await;
        store.add_channel("c1", "general").await.unwrap();
        store.add_message(&msg("m1", "c1", 1_000, "hi")).await.unwrap();
        store.add_message(&msg("m2", "c1", 2_000, "Hello world")).await.unwrap();
        let mut m3 = msg("m3", "c1", 3_000, "");
        m3.text = None;
        m3.content = Some("say HELLO".into());
        store.add_message(&m3).await.unwrap();
        store.add_message(&msg("x", "c2", 2_500, "hello there")).await.unwrap();

        let found = store.find_messages("hello", Some("c1"), 10).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m2"]);

        let prev = store.previous_message(&found[1]).await.unwrap().unwrap();
        let next = store.next_message(&found[1]).await.unwrap().unwrap();
        assert_eq!(prev.id, "m1");
        assert_eq!(next.id, "m3");
        assert!(store.next_message(&found[0]).await.unwrap().is_none());

        assert_eq!(
            store.channel_name("c1").await.unwrap().as_deref(),
            Some("general")
        );
        assert!(store.channel_name("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_messages_folds_non_ascii_case() {
        let (_tmp, store) = open(1).await;
        store.add_message(&msg("u", "c", 1_000, "Über das Café")).await.unwrap();
        store.add_message(&msg("a", "c", 2_000, "plain ascii")).await.unwrap();

        for query in ["über", "CAFÉ", "ÜBER DAS"] {
            let found = store.find_messages(query, None, 10).await.unwrap();
            let ids: Vec<&str> = found.iter().map(|m| m.id.as_str()).collect();
            assert_eq!(ids, vec!["u"], "query {:?}", query);
        }
    }

    #[tokio::test]
    async fn test_find_messages_limit_applies_after_filter() {
        let (_tmp, store) = open(1).await;
        for i in 0..5 {
            store
                .add_message(&msg(&format!("n{}", i), "c", 10 + i, "noise"))
                .await
                .unwrap();
        }
        store.add_message(&msg("hit1", "c", 1, "Straße")).await.unwrap();
        store.add_message(&msg("hit2", "c", 2, "STRASSE straße")).await.unwrap();

        let found = store.find_messages("straße", Some("c"), 1).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["hit2"]);
    }

    #[tokio::test]
    async fn test_sub_millisecond_neighbors_stay_distinct() {
        let (_tmp, store) = open(1).await;
        let base = 1_700_000_000_000_000;
        store.add_message(&msg("first", "c", base, "one")).await.unwrap();
        store.add_message(&msg("second", "c", base + 300, "two")).await.unwrap();
        store.add_message(&msg("third", "c", base + 600, "three")).await.unwrap();

        let found = store.find_messages("two", Some("c"), 10).await.unwrap();
        assert_eq!(found[0].sent, msg("x", "c", base + 300, "").sent);
        let prev = store.previous_message(&found[0]).await.unwrap().unwrap();
        let next = store.next_message(&found[0]).await.unwrap().unwrap();
        assert_eq!(prev.id, "first");
        assert_eq!(next.id, "third");
    }

    #[tokio::test]
    async fn test_messages_since_is_parameterized_window() {
        let (_tmp, store) = open(1).await;
        store.add_message(&msg("old", "c", 1_000, "a")).await.unwrap();
        store.add_message(&msg("mid", "c", 5_000, "b")).await.unwrap();
        store.add_message(&msg("new", "c", 9_000, "c")).await.unwrap();
        let since = DateTime::<Utc>::from_timestamp_micros(5_000).unwrap();
        let recent = store.messages_since(Some("c"), since).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["mid", "new"]);
    }

    #[tokio::test]
    async fn test_stats() {
        let (_tmp, store) = open(1).await;
        store.add_channel("c", "general").await.unwrap();
        store.add_message(&msg("m", "c", 1, "x")).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.channels, 1);
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.chunks, 0);
    }
}
