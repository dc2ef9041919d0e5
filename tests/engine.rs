//! End-to-end engine tests against the SQLite backend and filesystem
//! document source.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use channel_recall::blobs::FsDocumentSource;
use channel_recall::config::Config;
use channel_recall::db;
use channel_recall::engine::{EngineSettings, RetrievalEngine};
use channel_recall::migrate;
use channel_recall::sqlite_store::SqliteStore;
use channel_recall_core::embedding::Embedder;
use channel_recall_core::models::{chunk_id, Document, Message, RagOutcome};
use channel_recall_core::store::VectorIndex;
use channel_recall_core::{EmbedError, RecallError};

const DIMS: usize = 8;

/// Letter-frequency embedder that fails for any text containing `poison`.
struct LetterEmbedder {
    poison: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl LetterEmbedder {
    fn new() -> Self {
        Self {
            poison: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    fn poison(&self, marker: Option<&str>) {
        *self.poison.lock().unwrap() = marker.map(String::from);
    }
}

fn letters(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for c in text.chars().filter(|c| c.is_ascii_alphanumeric()) {
        v[c.to_ascii_lowercase() as u32 as usize % DIMS] += 1.0;
    }
    v
}

#[async_trait]
impl Embedder for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = self.poison.lock().unwrap().as_deref() {
            if text.contains(marker) {
                return Err(EmbedError::Unavailable("503 Service Unavailable".into()));
            }
        }
        Ok(letters(text))
    }
}

struct Harness {
    _tmp: TempDir,
    engine: Arc<RetrievalEngine>,
    store: Arc<SqliteStore>,
    documents: Arc<FsDocumentSource>,
    embedder: Arc<LetterEmbedder>,
}

async fn harness(max_chars: usize, overlap_chars: usize) -> Harness {
    let tmp = TempDir::new().unwrap();
    let config: Config = toml::from_str(&format!(
        "[db]\npath = \"{}/recall.sqlite\"\n",
        tmp.path().display()
    ))
    .unwrap();
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();

    let store = Arc::new(SqliteStore::new(pool.clone(), DIMS));
    let documents = Arc::new(FsDocumentSource::new(pool, config.blob_dir()));
    let embedder = Arc::new(LetterEmbedder::new());
    let settings = EngineSettings {
        max_chars,
        overlap_chars,
        max_retries: 1,
        backoff: Duration::from_millis(1),
        ..EngineSettings::default()
    };
    let engine = RetrievalEngine::new(
        store.clone(),
        store.clone(),
        documents.clone(),
        embedder.clone(),
        settings,
    )
    .unwrap();

    Harness {
        _tmp: tmp,
        engine: Arc::new(engine),
        store,
        documents,
        embedder,
    }
}

async fn upload(h: &Harness, id: &str, text: &str, channel: Option<&str>) {
    let doc = Document {
        id: id.into(),
        filename: format!("{}.txt", id),
        content_type: "text/plain".into(),
        size: text.len() as i64,
        channel_id: channel.map(String::from),
    };
    h.documents.put(&doc, text.as_bytes()).await.unwrap();
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_714_564_800 + secs, 0).single().unwrap()
}

fn message(id: &str, channel: &str, sent: DateTime<Utc>, text: &str) -> Message {
    Message {
        id: id.into(),
        channel_id: channel.into(),
        sender: "ana".into(),
        sent,
        text: Some(text.into()),
        content: None,
    }
}

#[tokio::test]
async fn nine_thousand_chars_make_three_chunks() {
    let h = harness(4000, 500).await;
    let text = "abcdefghij".repeat(900);
    upload(&h, "big", &text, None).await;

    let report = h.engine.ingest("big", None).await.unwrap();
    assert_eq!(report.chunks_stored, 3);

    let chunks = h.store.chunks_for("big").await.unwrap();
    let lengths: Vec<usize> = chunks.iter().map(|c| c.text.chars().count()).collect();
    assert_eq!(lengths, vec![4000, 4000, 2000]);
    for (i, c) in chunks.iter().enumerate() {
        assert_eq!(c.ordinal, i as i64);
        assert_eq!(c.id, chunk_id("big", i as i64));
    }
}

#[tokio::test]
async fn halted_ingestion_keeps_prefix_and_resumes() {
    let h = harness(100, 10).await;
    let text = ["alpha", "bravo", "charlie", "delta", "echo"]
        .iter()
        .map(|w| format!("{} {}", w, "word ".repeat(14)))
        .collect::<Vec<_>>()
        .join("\n\n");
    upload(&h, "doc", &text, Some("c1")).await;

    h.embedder.poison(Some("delta"));
    let err = h.engine.ingest("doc", None).await.unwrap_err();
    match &err {
        RecallError::PartialIngestion {
            chunks_stored,
            failed_ordinal,
            ..
        } => {
            assert_eq!(*chunks_stored, 3);
            assert_eq!(*failed_ordinal, 3);
        }
        other => panic!("expected PartialIngestion, got {:?}", other),
    }
    assert!(err.is_retryable());
    assert_eq!(h.store.count_chunks("doc").await.unwrap(), 3);

    h.embedder.poison(None);
    let report = h.engine.ingest("doc", None).await.unwrap();
    let chunks = h.store.chunks_for("doc").await.unwrap();
    assert_eq!(chunks.len(), report.chunks_stored);
    let ordinals: HashSet<i64> = chunks.iter().map(|c| c.ordinal).collect();
    assert_eq!(ordinals.len(), chunks.len(), "duplicate ordinals after resume");
    assert!(chunks.iter().all(|c| c.channel_id.as_deref() == Some("c1")));
}

#[tokio::test]
async fn concurrent_reingestion_never_corrupts() {
    let h = harness(100, 10).await;
    let text = (0..12)
        .map(|i| format!("Paragraph {} about the rollout checklist.", i))
        .collect::<Vec<_>>()
        .join("\n\n");
    upload(&h, "doc", &text, None).await;

    let (a, b) = tokio::join!(
        {
            let engine = h.engine.clone();
            async move { engine.ingest("doc", None).await }
        },
        {
            let engine = h.engine.clone();
            async move { engine.ingest("doc", None).await }
        }
    );
    for result in [a, b] {
        match result {
            Ok(_) => {}
            Err(RecallError::PartialIngestion { source, .. }) => {
                assert!(matches!(*source, RecallError::StorageConflict(_)));
            }
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    let report = h.engine.ingest("doc", None).await.unwrap();
    let chunks = h.store.chunks_for("doc").await.unwrap();
    assert_eq!(chunks.len(), report.chunks_stored);
    for (i, c) in chunks.iter().enumerate() {
        assert_eq!(c.ordinal, i as i64);
        assert_eq!(c.embedding, letters(&c.text));
    }
}

#[tokio::test]
async fn rag_is_scoped_and_ranked() {
    let h = harness(4000, 500).await;
    upload(&h, "ops", "deploy checklist for friday", Some("c1")).await;
    upload(&h, "ops-copy", "deploy checklist for friday", Some("c1")).await;
    upload(&h, "other", "deploy checklist for friday", Some("c2")).await;
    upload(&h, "misc", "zebra", Some("c1")).await;
    for id in ["ops", "ops-copy", "other", "misc"] {
        h.engine.ingest(id, None).await.unwrap();
    }

    let outcome = h
        .engine
        .rag_query("deploy checklist for friday", Some("c1"), Some(10))
        .await
        .unwrap();
    let RagOutcome::Context(bundle) = outcome else {
        panic!("expected context");
    };
    let docs: Vec<&str> = bundle.passages.iter().map(|p| p.document_id.as_str()).collect();
    assert_eq!(docs.len(), 3);
    assert!(!docs.contains(&"other"));
    assert_eq!(docs[2], "misc");

    // Equal distances are ordered by chunk id.
    let mut tied = vec![chunk_id("ops", 0), chunk_id("ops-copy", 0)];
    tied.sort();
    assert_eq!(bundle.passages[0].chunk_id, tied[0]);
    assert_eq!(bundle.passages[1].chunk_id, tied[1]);

    let none = h
        .engine
        .rag_query("deploy checklist", Some("c-empty"), None)
        .await
        .unwrap();
    assert!(matches!(none, RagOutcome::NoRelevantContent));
}

#[tokio::test]
async fn search_stitches_neighbors_by_time() {
    let h = harness(4000, 500).await;
    h.store.add_channel("c1", "general").await.unwrap();
    h.store.add_message(&message("m1", "c1", at(1), "hi")).await.unwrap();
    h.store.add_message(&message("m2", "c1", at(2), "Hello")).await.unwrap();
    h.store.add_message(&message("m3", "c1", at(3), "bye")).await.unwrap();
    h.store.add_message(&message("x1", "c2", at(2), "hello there")).await.unwrap();
    // Same timestamp as m2: not a neighbor of it.
    h.store.add_message(&message("m2b", "c1", at(2), "same instant")).await.unwrap();

    let matches = h.engine.search("hello", Some("c1")).await.unwrap();
    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!(m.message.id, "m2");
    assert_eq!(m.channel_name.as_deref(), Some("general"));
    assert_eq!(m.previous_message.as_ref().unwrap().id, "m1");
    assert_eq!(m.next_message.as_ref().unwrap().id, "m3");

    let everywhere = h.engine.search("HELLO", None).await.unwrap();
    let ids: Vec<&str> = everywhere.iter().map(|m| m.message.id.as_str()).collect();
    assert_eq!(ids, vec!["x1", "m2"]);
    assert!(everywhere[0].previous_message.is_none());
    assert!(everywhere[0].next_message.is_none());

    assert!(h.engine.search("", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_document_is_not_found() {
    let h = harness(4000, 500).await;
    assert!(matches!(
        h.engine.ingest("missing", None).await,
        Err(RecallError::NotFound(_))
    ));
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
}
