//! Deferred answer tasks.
//!
//! A chat message that asks for an AI reply must not wait on embedding or
//! generation latency. [`AnswerTasks::spawn`] returns immediately with a
//! [`TaskHandle`]; retrieval and generation run on a tokio task afterwards.
//!
//! Every outcome is observable: the handle yields `Result<Answer, _>`,
//! failures are logged at `warn`, and an optional report channel receives a
//! [`TaskReport`] for every finished task, including failed, panicked and
//! cancelled ones.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use channel_recall_core::models::RagOutcome;
use channel_recall_core::RecallError;

use crate::engine::RetrievalEngine;
use crate::generation::{complete_with_retry, compose_prompt, GenerationPolicy, Generator};

/// What to answer.
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub query: String,
    pub channel_id: Option<String>,
    pub top_k: Option<usize>,
}

/// A finished answer. `text` is `None` when retrieval found nothing and
/// generation was skipped.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub query: String,
    pub outcome: RagOutcome,
    pub text: Option<String>,
}

/// Delivered on the report channel once per finished task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: String,
    pub result: Result<Answer, String>,
}

/// Handle to one spawned answer task.
pub struct TaskHandle {
    id: String,
    inner: JoinHandle<Result<Answer, RecallError>>,
    work: AbortHandle,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the task. Panics and cancellation become
    /// [`RecallError::Task`].
    pub async fn join(self) -> Result<Answer, RecallError> {
        match self.inner.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(RecallError::Task(format!("task {} panicked", self.id))),
            Err(_) => Err(RecallError::Task(format!("task {} was cancelled", self.id))),
        }
    }

    /// Cancel retrieval and generation. The task still finishes with
    /// [`RecallError::Task`] and is reported like any other failure.
    pub fn abort(&self) {
        self.work.abort();
    }
}

/// Spawns retrieval-then-generation work off the caller's path.
#[derive(Clone)]
pub struct AnswerTasks {
    engine: Arc<RetrievalEngine>,
    generator: Arc<dyn Generator>,
    policy: GenerationPolicy,
    reports: Option<UnboundedSender<TaskReport>>,
}

impl AnswerTasks {
    pub fn new(
        engine: Arc<RetrievalEngine>,
        generator: Arc<dyn Generator>,
        policy: GenerationPolicy,
    ) -> Self {
        Self {
            engine,
            generator,
            policy,
            reports: None,
        }
    }

    /// Also send a [`TaskReport`] for every finished task to `sender`.
    pub fn with_reports(mut self, sender: UnboundedSender<TaskReport>) -> Self {
        self.reports = Some(sender);
        self
    }

    pub fn spawn(&self, request: AnswerRequest) -> TaskHandle {
        let id = Uuid::new_v4().to_string();
        let engine = self.engine.clone();
        let generator = self.generator.clone();
        let policy = self.policy;
        let reports = self.reports.clone();
        let task_id = id.clone();

        // The body runs in its own task so panics and aborts are still
        // observed and reported by the supervising one.
        let work = tokio::spawn(async move {
            answer(&engine, generator.as_ref(), &policy, request).await
        });
        let work_abort = work.abort_handle();

        let inner = tokio::spawn(async move {
            let result = match work.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    Err(RecallError::Task(format!("task {} panicked", task_id)))
                }
                Err(_) => Err(RecallError::Task(format!("task {} was cancelled", task_id))),
            };

            match &result {
                Ok(answer) => info!(
                    task_id = %task_id,
                    answered = answer.text.is_some(),
                    "answer task finished"
                ),
                Err(e) => warn!(task_id = %task_id, error = %e, "answer task failed"),
            }
            if let Some(sender) = reports {
                let report = TaskReport {
                    task_id: task_id.clone(),
                    result: result.as_ref().map(Clone::clone).map_err(|e| e.to_string()),
                };
                // A dropped receiver just means nobody is listening.
                let _ = sender.send(report);
            }
            result
        });

        TaskHandle {
            id,
            inner,
            work: work_abort,
        }
    }
}

async fn answer(
    engine: &RetrievalEngine,
    generator: &dyn Generator,
    policy: &GenerationPolicy,
    request: AnswerRequest,
) -> Result<Answer, RecallError> {
    let outcome = engine
        .rag_query(&request.query, request.channel_id.as_deref(), request.top_k)
        .await?;

    let text = match &outcome {
        RagOutcome::NoRelevantContent => None,
        RagOutcome::Context(bundle) => {
            let prompt = compose_prompt(bundle);
            Some(complete_with_retry(generator, &prompt, policy).await?)
        }
    };

    Ok(Answer {
        query: request.query,
        outcome,
        text,
    })
}
