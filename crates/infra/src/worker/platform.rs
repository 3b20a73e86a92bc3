//! Execution platforms for generation events.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{Instrument, debug, info_span, warn};

use coachgen_ai::GenerationError;

use super::event::{AttemptContext, GenerationRequested};
use super::executor::{GenerationWorker, WorkerOutcome};
use super::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("execution platform unavailable: {0}")]
    Unavailable(String),

    #[error("event rejected: {0}")]
    Rejected(String),
}

/// Accepts generation events and runs them independently of the caller.
///
/// A successful `dispatch` means the platform owns the event from now on,
/// including retries. Delivery is at-least-once.
#[async_trait]
pub trait ExecutionPlatform: Send + Sync + 'static {
    async fn dispatch(&self, event: GenerationRequested) -> Result<(), PlatformError>;
}

/// Runs each event on its own tokio task with bounded retries.
pub struct InProcessPlatform {
    worker: Arc<GenerationWorker>,
    retry: RetryPolicy,
}

impl InProcessPlatform {
    pub fn new(worker: Arc<GenerationWorker>, retry: RetryPolicy) -> Self {
        Self { worker, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// All attempts for one event, backing off between retriable failures.
    pub async fn execute(
        &self,
        event: &GenerationRequested,
    ) -> Result<WorkerOutcome, GenerationError> {
        Self::attempts(&self.worker, &self.retry, event).await
    }

    async fn attempts(
        worker: &GenerationWorker,
        retry: &RetryPolicy,
        event: &GenerationRequested,
    ) -> Result<WorkerOutcome, GenerationError> {
        let max_attempts = retry.attempts();
        let mut attempt = 1;
        loop {
            match worker.run(event, AttemptContext::new(attempt, max_attempts)).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_retriable() && retry.should_retry(attempt) => {
                    let delay = retry.delay_after(attempt);
                    debug!(
                        request_id = %event.request_id,
                        attempt,
                        ?delay,
                        "backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl ExecutionPlatform for InProcessPlatform {
    async fn dispatch(&self, event: GenerationRequested) -> Result<(), PlatformError> {
        let runtime = Handle::try_current().map_err(|e| PlatformError::Unavailable(e.to_string()))?;

        let worker = self.worker.clone();
        let retry = self.retry.clone();
        let span = info_span!("generation", request_id = %event.request_id);
        runtime.spawn(
            async move {
                if let Err(err) = Self::attempts(&worker, &retry, &event).await {
                    warn!(category = %err.category(), error = %err, "generation settled as failed");
                }
            }
            .instrument(span),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use coachgen_ai::{ErrorCategory, GenerationParams};
    use coachgen_core::{SystemClock, UserId};
    use serde_json::json;

    use super::*;
    use crate::cache::{CacheConfig, ReconnectionCache};
    use crate::queue::{InMemoryQueueStore, QueueStatus, QueueStore};
    use crate::testing::{ScriptedGenerator, rid};

    fn platform(
        generator: Arc<ScriptedGenerator>,
        retry: RetryPolicy,
    ) -> (InProcessPlatform, Arc<InMemoryQueueStore>) {
        let store = Arc::new(InMemoryQueueStore::new());
        let cache = Arc::new(ReconnectionCache::new(Arc::new(SystemClock), CacheConfig::default()));
        let worker = Arc::new(GenerationWorker::new(
            store.clone(),
            generator,
            cache,
            Duration::from_secs(30),
        ));
        (InProcessPlatform::new(worker, retry), store)
    }

    fn event(raw: &str) -> GenerationRequested {
        let params = GenerationParams::new("meal_plan", json!({}));
        GenerationRequested::new(rid(raw), UserId::new(), params)
    }

    #[tokio::test(start_paused = true)]
    async fn retriable_failures_stop_at_the_attempt_bound() {
        let generator = Arc::new(ScriptedGenerator::failing(
            Duration::from_millis(50),
            GenerationError::malformed("truncated JSON"),
        ));
        let (platform, store) = platform(generator.clone(), RetryPolicy::default());
        let ev = event("r8");

        let err = platform.execute(&ev).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Parse);
        assert_eq!(generator.calls(), 3);

        let entry = store.get_by_request_id(&ev.request_id).await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Failed);
        assert_eq!(entry.error_message.as_deref(), Some(ErrorCategory::Parse.user_message()));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_a_later_attempt() {
        let generator = Arc::new(ScriptedGenerator::sequence(
            Duration::from_millis(50),
            vec![
                Err(GenerationError::upstream("502")),
                Ok(coachgen_ai::GenerationOutput::new("art-2")),
            ],
        ));
        let (platform, store) = platform(generator.clone(), RetryPolicy::default());
        let ev = event("r9");

        let outcome = platform.execute(&ev).await.unwrap();
        assert!(matches!(outcome, WorkerOutcome::Completed(ref o) if o.result_ref == "art-2"));
        assert_eq!(generator.calls(), 2);
        let entry = store.get_by_request_id(&ev.request_id).await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retriable_failure_runs_once() {
        let generator = Arc::new(ScriptedGenerator::failing(
            Duration::from_millis(50),
            GenerationError::domain_validation("unsafe load"),
        ));
        let (platform, _) = platform(generator.clone(), RetryPolicy::default());

        let outcome = platform.execute(&event("r10")).await.unwrap();
        assert!(matches!(
            outcome,
            WorkerOutcome::Failed { category: Some(ErrorCategory::DomainValidation), .. }
        ));
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_runs_in_the_background() {
        let generator = Arc::new(ScriptedGenerator::succeeding(Duration::from_secs(3), "art-3"));
        let (platform, store) = platform(generator, RetryPolicy::default());
        let ev = event("r11");

        platform.dispatch(ev.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;

        let entry = store.get_by_request_id(&ev.request_id).await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Completed);
        assert_eq!(entry.result_ref.as_deref(), Some("art-3"));
    }
}
