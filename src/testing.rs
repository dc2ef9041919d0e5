//! Scripted embedder and engine builders shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use channel_recall_core::embedding::Embedder;
use channel_recall_core::store::memory::InMemoryStore;
use channel_recall_core::EmbedError;

use crate::engine::{EngineSettings, RetrievalEngine};

/// Deterministic embedder: letter frequencies folded into `dims` buckets.
///
/// Failures can be queued with [`fail_next`](Self::fail_next) or attached
/// to texts containing a marker with [`fail_when`](Self::fail_when).
pub struct FakeEmbedder {
    dims: usize,
    output_dims: usize,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
    queued: Mutex<VecDeque<EmbedError>>,
    poison: Mutex<Option<(String, EmbedError)>>,
}

impl FakeEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            output_dims: dims,
            delay: None,
            calls: AtomicUsize::new(0),
            queued: Mutex::new(VecDeque::new()),
            poison: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report `dims` but return vectors of another length.
    pub fn with_output_dims(mut self, output_dims: usize) -> Self {
        self.output_dims = output_dims;
        self
    }

    pub fn fail_next(&self, err: EmbedError) {
        self.queued.lock().unwrap().push_back(err);
    }

    pub fn fail_when(&self, marker: &str, err: EmbedError) {
        *self.poison.lock().unwrap() = Some((marker.to_string(), err));
    }

    pub fn heal(&self) {
        *self.poison.lock().unwrap() = None;
    }

    pub fn vector_for(text: &str, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dims];
        for c in text.chars().filter(|c| c.is_alphanumeric()) {
            let lower = c.to_lowercase().next().unwrap_or(c);
            v[lower as u32 as usize % dims] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.queued.lock().unwrap().pop_front() {
            return Err(err);
        }
        if let Some((marker, err)) = self.poison.lock().unwrap().as_ref() {
            if text.contains(marker.as_str()) {
                return Err(err.clone());
            }
        }
        Ok(Self::vector_for(text, self.output_dims))
    }
}

/// An engine over a fresh [`InMemoryStore`] sized to the embedder.
pub fn engine_with(
    embedder: Arc<FakeEmbedder>,
    settings: EngineSettings,
) -> (RetrievalEngine, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new(embedder.dims()));
    let engine = RetrievalEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        embedder,
        settings,
    )
    .unwrap();
    (engine, store)
}
