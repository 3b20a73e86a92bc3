//! Inline execution for when no background platform is available.
//!
//! Runs the worker's steps inside the streaming request: synthetic ticks
//! and real milestones share the client's emitter, and the generation is
//! dropped as soon as the client disconnects.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use coachgen_ai::GenerationError;
use coachgen_core::{Clock, RequestId};

use crate::cache::ReconnectionCache;
use crate::progress::{ProgressEmitter, ProgressEvent, SyntheticSchedule, SyntheticTicker};
use crate::queue::QueueStore;
use crate::worker::{
    AttemptContext, GenerationRequested, GenerationWorker, StartCheckpoint, WorkerOutcome,
};

/// Stored on the entry when a client disconnect aborts inline generation.
pub const INTERRUPTED_MESSAGE: &str =
    "Generation was interrupted because the connection closed. Please start it again.";

pub struct SyncFallbackExecutor {
    worker: Arc<GenerationWorker>,
    store: Arc<dyn QueueStore>,
    cache: Arc<ReconnectionCache>,
    schedule: SyntheticSchedule,
    clock: Arc<dyn Clock>,
}

impl SyncFallbackExecutor {
    pub fn new(
        worker: Arc<GenerationWorker>,
        store: Arc<dyn QueueStore>,
        cache: Arc<ReconnectionCache>,
        schedule: SyntheticSchedule,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            worker,
            store,
            cache,
            schedule,
            clock,
        }
    }

    /// Runs one request to a terminal event on `emitter`. A single attempt:
    /// there is no platform around to retry it.
    #[instrument(skip_all, fields(request_id = %event.request_id))]
    pub async fn run(&self, event: GenerationRequested, emitter: ProgressEmitter) {
        let request_id = event.request_id.clone();

        let params = match self.worker.start(&event).await {
            Ok(StartCheckpoint::Ready(params)) => params,
            Ok(StartCheckpoint::Settled(outcome)) => {
                emitter.finish(terminal_event(outcome));
                return;
            }
            Err(err) => {
                warn!(error = %err, "could not start inline generation");
                emitter.finish(failure_event(&err));
                return;
            }
        };

        let ticker =
            SyntheticTicker::spawn(emitter.clone(), self.schedule.clone(), self.clock.clone());
        let generated = tokio::select! {
            generated = self.worker.execute(&request_id, &params, Some(&emitter)) => generated,
            () = emitter.client_gone() => {
                drop(ticker);
                self.interrupted(&request_id).await;
                return;
            }
        };

        emitter.stop_synthetic();
        drop(ticker);

        let settled = self
            .worker
            .finish(&request_id, generated, AttemptContext::single())
            .await;
        let terminal = match settled {
            Ok(outcome) => terminal_event(outcome),
            Err(err) => failure_event(&err),
        };
        emitter.finish(terminal);
    }

    async fn interrupted(&self, request_id: &RequestId) {
        info!(request_id = %request_id, "client disconnected; inline generation aborted");
        if let Err(err) = self.store.mark_failed(request_id, INTERRUPTED_MESSAGE).await {
            warn!(request_id = %request_id, error = %err, "failed to mark interrupted entry");
        }
        self.cache.error(request_id, INTERRUPTED_MESSAGE);
    }
}

pub(crate) fn terminal_event(outcome: WorkerOutcome) -> ProgressEvent {
    match outcome {
        WorkerOutcome::Completed(output) => ProgressEvent::completed(&output),
        WorkerOutcome::Failed { category, message } => ProgressEvent::failed(0, category, message),
    }
}

pub(crate) fn failure_event(err: &GenerationError) -> ProgressEvent {
    let category = err.category();
    ProgressEvent::failed(0, Some(category), category.user_message())
}
