//! The generation worker: start, execute, finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, info, instrument, warn};

use coachgen_ai::{
    ChannelProgressSink, ErrorCategory, GenerationError, GenerationOutput, GenerationParams,
    Generator, ProgressUpdate,
};
use coachgen_core::RequestId;

use crate::cache::ReconnectionCache;
use crate::progress::{ProgressEmitter, ProgressEvent, SYNTHETIC_CEILING, phases};
use crate::queue::{ProgressWrite, QueueEntry, QueueStatus, QueueStore, QueueStoreError};

use super::event::{AttemptContext, GenerationRequested};

/// How a request settled.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    /// Output of this run, or just the stored reference when an earlier
    /// delivery already completed the entry.
    Completed(GenerationOutput),
    /// Terminal failure. No further attempts follow.
    Failed {
        category: Option<ErrorCategory>,
        message: String,
    },
}

impl WorkerOutcome {
    fn of(entry: &QueueEntry) -> Option<Self> {
        match entry.status {
            QueueStatus::Completed => Some(Self::Completed(GenerationOutput::new(
                entry.result_ref.clone().unwrap_or_default(),
            ))),
            QueueStatus::Failed => Some(Self::Failed {
                category: None,
                message: entry.error_message.clone().unwrap_or_default(),
            }),
            QueueStatus::Pending | QueueStatus::InProgress => None,
        }
    }
}

/// Result of the start checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum StartCheckpoint {
    /// Entry is in progress; generate with its stored context.
    Ready(GenerationParams),
    /// An earlier delivery already settled the entry.
    Settled(WorkerOutcome),
}

pub struct GenerationWorker {
    store: Arc<dyn QueueStore>,
    generator: Arc<dyn Generator>,
    cache: Arc<ReconnectionCache>,
    ceiling: Duration,
}

impl GenerationWorker {
    pub fn new(
        store: Arc<dyn QueueStore>,
        generator: Arc<dyn Generator>,
        cache: Arc<ReconnectionCache>,
        ceiling: Duration,
    ) -> Self {
        Self {
            store,
            generator,
            cache,
            ceiling,
        }
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// One attempt. `Err` means "retry me"; settled failures come back as
    /// `Ok(WorkerOutcome::Failed)` unless they were retriable.
    #[instrument(
        skip_all,
        fields(
            request_id = %event.request_id,
            attempt = ctx.attempt,
            max_attempts = ctx.max_attempts
        )
    )]
    pub async fn run(
        &self,
        event: &GenerationRequested,
        ctx: AttemptContext,
    ) -> Result<WorkerOutcome, GenerationError> {
        let params = match self.start(event).await? {
            StartCheckpoint::Settled(outcome) => return Ok(outcome),
            StartCheckpoint::Ready(params) => params,
        };
        let generated = self.execute(&event.request_id, &params, None).await;
        self.finish(&event.request_id, generated, ctx).await
    }

    /// Ensures the entry exists and is `in_progress` with a readable
    /// progress value before any generation starts.
    pub async fn start(
        &self,
        event: &GenerationRequested,
    ) -> Result<StartCheckpoint, GenerationError> {
        let entry = self
            .store
            .create(&event.request_id, event.user_id, event.params.clone())
            .await?
            .entry;

        if let Some(outcome) = WorkerOutcome::of(&entry) {
            debug!(
                request_id = %event.request_id,
                status = %entry.status,
                "entry already settled; skipping generation"
            );
            return Ok(StartCheckpoint::Settled(outcome));
        }
        if entry.status == QueueStatus::Pending {
            self.store.mark_started(&event.request_id).await?;
        } else {
            debug!(request_id = %event.request_id, "resuming in-progress entry");
        }
        self.write_progress(&event.request_id, 0, phases::STARTING).await;
        Ok(StartCheckpoint::Ready(entry.context))
    }

    /// Runs the generator under the ceiling timeout. Real progress goes to
    /// the store and, when streaming inline, to `mirror`.
    pub async fn execute(
        &self,
        request_id: &RequestId,
        params: &GenerationParams,
        mirror: Option<&ProgressEmitter>,
    ) -> Result<GenerationOutput, GenerationError> {
        let (tx, mut rx) = unbounded_channel();

        let generation = async {
            let sink = ChannelProgressSink::new(tx);
            let result =
                tokio::time::timeout(self.ceiling, self.generator.generate(params, &sink)).await;
            drop(sink);
            result.unwrap_or_else(|_| Err(GenerationError::Timeout { after: self.ceiling }))
        };
        let forward = async {
            while let Some(update) = rx.recv().await {
                self.forward(request_id, update, mirror).await;
            }
        };

        let (result, ()) = tokio::join!(generation, forward);
        result
    }

    /// Settles the entry, or records the attempt and re-raises a retriable
    /// failure while attempts remain.
    pub async fn finish(
        &self,
        request_id: &RequestId,
        generated: Result<GenerationOutput, GenerationError>,
        ctx: AttemptContext,
    ) -> Result<WorkerOutcome, GenerationError> {
        let err = match generated {
            Ok(output) => match self.store.mark_completed(request_id, &output.result_ref).await {
                Ok(_) => {
                    self.cache.complete(request_id, &output);
                    info!(
                        request_id = %request_id,
                        result_ref = %output.result_ref,
                        "generation completed"
                    );
                    return Ok(WorkerOutcome::Completed(output));
                }
                Err(QueueStoreError::InvalidTransition { .. }) => {
                    return self.settled(request_id).await;
                }
                Err(err) => GenerationError::from(err),
            },
            Err(err) => err,
        };
        self.fail(request_id, err, ctx).await
    }

    async fn fail(
        &self,
        request_id: &RequestId,
        err: GenerationError,
        ctx: AttemptContext,
    ) -> Result<WorkerOutcome, GenerationError> {
        let category = err.category();
        let message = category.user_message();

        if category.is_retriable() && !ctx.is_final() {
            warn!(
                request_id = %request_id,
                %category,
                error = %err,
                attempt = ctx.attempt,
                "generation attempt failed; will retry"
            );
            if let Err(store_err) = self.store.record_retry(request_id, message).await {
                warn!(request_id = %request_id, error = %store_err, "failed to record retry");
            }
            return Err(err);
        }

        match self.store.mark_failed(request_id, message).await {
            Ok(_) => {}
            Err(QueueStoreError::InvalidTransition { .. }) => return self.settled(request_id).await,
            Err(store_err) => {
                warn!(request_id = %request_id, error = %store_err, "failed to mark entry failed");
            }
        }
        self.cache.error(request_id, message);

        if category.is_retriable() {
            warn!(
                request_id = %request_id,
                %category,
                error = %err,
                attempts = ctx.attempt,
                "generation failed; attempts exhausted"
            );
            Err(err)
        } else {
            info!(
                request_id = %request_id,
                %category,
                error = %err,
                "generation rejected; not retrying"
            );
            Ok(WorkerOutcome::Failed {
                category: Some(category),
                message: message.to_string(),
            })
        }
    }

    async fn settled(&self, request_id: &RequestId) -> Result<WorkerOutcome, GenerationError> {
        let entry = self
            .store
            .get_by_request_id(request_id)
            .await?
            .ok_or_else(|| QueueStoreError::NotFound(request_id.clone()))?;
        WorkerOutcome::of(&entry).ok_or_else(|| {
            GenerationError::storage(format!(
                "entry {request_id} is {} after a rejected transition",
                entry.status
            ))
        })
    }

    async fn forward(
        &self,
        request_id: &RequestId,
        update: ProgressUpdate,
        mirror: Option<&ProgressEmitter>,
    ) {
        if let Some(emitter) = mirror {
            let shown = update.percent.min(SYNTHETIC_CEILING - 1);
            emitter.milestone(ProgressEvent::new(
                update.phase.clone(),
                shown,
                update.message.clone(),
            ));
        }
        self.write_progress(request_id, update.percent, &update.phase).await;
    }

    /// Best-effort: a failed progress write never fails the generation.
    async fn write_progress(&self, request_id: &RequestId, percent: u8, phase: &str) {
        match self.store.update_progress(request_id, percent, phase).await {
            Ok(ProgressWrite::Applied) => {}
            Ok(skipped) => {
                debug!(request_id = %request_id, percent, ?skipped, "progress write skipped")
            }
            Err(err) => {
                warn!(request_id = %request_id, percent, error = %err, "progress write failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use coachgen_core::{SystemClock, UserId};
    use serde_json::json;

    use super::*;
    use crate::cache::{CacheConfig, CacheStatus};
    use crate::queue::InMemoryQueueStore;
    use crate::testing::{FlakyProgressStore, ScriptedGenerator, rid};

    struct Harness {
        store: Arc<dyn QueueStore>,
        cache: Arc<ReconnectionCache>,
        generator: Arc<ScriptedGenerator>,
        worker: GenerationWorker,
    }

    fn harness(
        store: Arc<dyn QueueStore>,
        generator: ScriptedGenerator,
        ceiling: Duration,
    ) -> Harness {
        let cache = Arc::new(ReconnectionCache::new(Arc::new(SystemClock), CacheConfig::default()));
        let generator = Arc::new(generator);
        let worker =
            GenerationWorker::new(store.clone(), generator.clone(), cache.clone(), ceiling);
        Harness {
            store,
            cache,
            generator,
            worker,
        }
    }

    fn event(raw: &str) -> GenerationRequested {
        let params = GenerationParams::new("workout_plan", json!({"days": 3}));
        GenerationRequested::new(rid(raw), UserId::new(), params)
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_timeout_fails_with_timeout_category() {
        let h = harness(
            Arc::new(InMemoryQueueStore::new()),
            ScriptedGenerator::succeeding(Duration::from_secs(2), "art-1"),
            Duration::from_secs(1),
        );
        let ev = event("r1");

        let err = h.worker.run(&ev, AttemptContext::single()).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Timeout);

        let entry = h.store.get_by_request_id(&ev.request_id).await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Failed);
        let message = entry.error_message.unwrap();
        assert_eq!(message, ErrorCategory::Timeout.user_message());
        assert_ne!(message, ErrorCategory::Upstream.user_message());
        assert_eq!(h.cache.get(&ev.request_id).unwrap().status, CacheStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn completes_within_ceiling() {
        let h = harness(
            Arc::new(InMemoryQueueStore::new()),
            ScriptedGenerator::succeeding(Duration::from_secs(5), "art-1"),
            Duration::from_secs(10),
        );
        let ev = event("r1");

        let outcome = h.worker.run(&ev, AttemptContext::single()).await.unwrap();
        let WorkerOutcome::Completed(output) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(output.result_ref, "art-1");

        let entry = h.store.get_by_request_id(&ev.request_id).await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Completed);
        assert_eq!(entry.result_ref.as_deref(), Some("art-1"));
        assert_eq!(entry.progress_percent, 100);
        assert_eq!(h.cache.get(&ev.request_id).unwrap().status, CacheStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn domain_validation_settles_without_reraising() {
        let h = harness(
            Arc::new(InMemoryQueueStore::new()),
            ScriptedGenerator::failing(
                Duration::from_millis(10),
                GenerationError::domain_validation("too many rest days"),
            ),
            Duration::from_secs(10),
        );
        let ev = event("r3");

        let outcome = h.worker.run(&ev, AttemptContext::new(1, 3)).await.unwrap();
        assert_eq!(
            outcome,
            WorkerOutcome::Failed {
                category: Some(ErrorCategory::DomainValidation),
                message: ErrorCategory::DomainValidation.user_message().to_string(),
            }
        );
        let entry = h.store.get_by_request_id(&ev.request_id).await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Failed);
        assert!(!entry.error_message.unwrap().contains("rest days"));
        assert_eq!(h.generator.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retriable_failure_with_attempts_left_stays_in_progress() {
        let h = harness(
            Arc::new(InMemoryQueueStore::new()),
            ScriptedGenerator::failing(Duration::from_millis(10), GenerationError::upstream("503")),
            Duration::from_secs(10),
        );
        let ev = event("r4");

        let err = h.worker.run(&ev, AttemptContext::new(1, 3)).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Upstream);

        let entry = h.store.get_by_request_id(&ev.request_id).await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::InProgress);
        assert_eq!(entry.current_phase, "retrying");
        assert_eq!(
            entry.last_attempt_error.as_deref(),
            Some(ErrorCategory::Upstream.user_message())
        );
        assert_eq!(h.cache.get(&ev.request_id), None);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_write_failures_do_not_fail_generation() {
        let h = harness(
            Arc::new(FlakyProgressStore::new()),
            ScriptedGenerator::succeeding(Duration::from_secs(1), "art-7"),
            Duration::from_secs(10),
        );
        let ev = event("r7");

        let outcome = h.worker.run(&ev, AttemptContext::single()).await.unwrap();
        assert!(matches!(outcome, WorkerOutcome::Completed(ref o) if o.result_ref == "art-7"));
    }

    #[tokio::test(start_paused = true)]
    async fn redelivery_after_completion_skips_generation() {
        let h = harness(
            Arc::new(InMemoryQueueStore::new()),
            ScriptedGenerator::succeeding(Duration::from_secs(1), "art-1"),
            Duration::from_secs(10),
        );
        let ev = event("r5");

        h.worker.run(&ev, AttemptContext::single()).await.unwrap();
        let again = h.worker.run(&ev, AttemptContext::single()).await.unwrap();

        assert_eq!(again, WorkerOutcome::Completed(GenerationOutput::new("art-1")));
        assert_eq!(h.generator.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mirrored_progress_stays_below_the_synthetic_ceiling() {
        let h = harness(
            Arc::new(InMemoryQueueStore::new()),
            ScriptedGenerator::succeeding(Duration::from_secs(1), "art-1")
                .with_milestones(&[("drafting", 40), ("checking", 97)]),
            Duration::from_secs(10),
        );
        let ev = event("r6");
        let (emitter, mut rx) = ProgressEmitter::channel();

        let StartCheckpoint::Ready(params) = h.worker.start(&ev).await.unwrap() else {
            panic!("fresh entry must be ready");
        };
        h.worker.execute(&ev.request_id, &params, Some(&emitter)).await.unwrap();

        let seen: Vec<(String, u8)> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| (e.phase, e.progress))
            .collect();
        assert_eq!(seen, vec![("drafting".to_string(), 40), ("checking".to_string(), 89)]);

        let entry = h.store.get_by_request_id(&ev.request_id).await.unwrap().unwrap();
        assert_eq!(entry.progress_percent, 97);
    }
}
