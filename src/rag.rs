//! Retrieval-augmented query: embed a question, fetch the nearest chunks,
//! and bundle their text as grounding context.
//!
//! The engine never composes an answer itself. An empty retrieval is the
//! ordinary [`RagOutcome::NoRelevantContent`] outcome, not an error, so a
//! caller can tell "nothing relevant" apart from "the embedder is down".

use anyhow::Result;
use tracing::{debug, info};

use channel_recall_core::models::{ContextBundle, ContextPassage, RagOutcome};
use channel_recall_core::RecallError;

use crate::config::Config;
use crate::engine::{RetrievalEngine, Services};
use crate::generation::{compose_prompt, create_generator, GenerationPolicy};
use crate::tasks::{AnswerRequest, AnswerTasks};

impl RetrievalEngine {
    /// Retrieve up to `top_k` (default from settings) chunks nearest to
    /// `query`, scoped to `channel_id` when given.
    ///
    /// Chunks farther than the configured `max_distance` are dropped.
    pub async fn rag_query(
        &self,
        query: &str,
        channel_id: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<RagOutcome, RecallError> {
        if query.trim().is_empty() {
            return Ok(RagOutcome::NoRelevantContent);
        }

        let embedding = self.embed_with_retry(query).await?;
        let k = top_k.unwrap_or(self.settings.top_k);
        let hits = self.index.query_nearest(&embedding, k, channel_id).await?;
        let retrieved = hits.len();

        let passages: Vec<ContextPassage> = hits
            .into_iter()
            .filter(|hit| {
                self.settings
                    .max_distance
                    .map_or(true, |max| hit.distance <= max)
            })
            .map(ContextPassage::from)
            .collect();
        debug!(retrieved, kept = passages.len(), "nearest chunks");

        if passages.is_empty() {
            info!(channel_id, "no relevant content");
            return Ok(RagOutcome::NoRelevantContent);
        }
        Ok(RagOutcome::Context(ContextBundle {
            query: query.to_string(),
            passages,
        }))
    }
}

fn print_bundle(bundle: &ContextBundle) {
    for (i, p) in bundle.passages.iter().enumerate() {
        let page = p.page.map(|n| format!(" p.{}", n)).unwrap_or_default();
        println!(
            "{}. [{:.3}] {} #{}{}",
            i + 1,
            p.distance,
            p.document_id,
            p.ordinal,
            page
        );
        let text = p.text.replace('\n', " ");
        let short: String = text.trim().chars().take(240).collect();
        println!("    excerpt: \"{}\"", short);
        println!("    chunk: {}", p.chunk_id);
        println!();
    }
}

/// `recall ask "<question>"`
///
/// Without `answer`, prints the retrieved context. With it, runs a deferred
/// answer task through the configured generator and prints the answer.
pub async fn run_ask(
    config: &Config,
    query: &str,
    channel: Option<&str>,
    top_k: Option<usize>,
    answer: bool,
) -> Result<()> {
    let services = Services::connect(config).await?;

    if !answer {
        let outcome = services.engine.rag_query(query, channel, top_k).await;
        services.close().await;
        match outcome? {
            RagOutcome::NoRelevantContent => println!("No relevant content."),
            RagOutcome::Context(bundle) => print_bundle(&bundle),
        }
        return Ok(());
    }

    let generator = create_generator(&config.generation)?;
    let tasks = AnswerTasks::new(
        services.engine.clone(),
        generator,
        GenerationPolicy::from_config(&config.generation),
    );
    let handle = tasks.spawn(AnswerRequest {
        query: query.to_string(),
        channel_id: channel.map(String::from),
        top_k,
    });
    let result = handle.join().await;
    services.close().await;

    let answer = result?;
    match (&answer.outcome, &answer.text) {
        (RagOutcome::Context(bundle), Some(text)) => {
            println!("{}", text.trim());
            println!();
            println!("Sources:");
            print_bundle(bundle);
        }
        _ => println!("No relevant content."),
    }
    Ok(())
}

/// `recall ask --prompt`: print the grounding prompt a generator would see.
pub async fn run_prompt(
    config: &Config,
    query: &str,
    channel: Option<&str>,
    top_k: Option<usize>,
) -> Result<()> {
    let services = Services::connect(config).await?;
    let outcome = services.engine.rag_query(query, channel, top_k).await;
    services.close().await;
    match outcome? {
        RagOutcome::NoRelevantContent => println!("No relevant content."),
        RagOutcome::Context(bundle) => println!("{}", compose_prompt(&bundle)),
    }
    Ok(())
}
