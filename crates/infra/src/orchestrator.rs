//! Per-request coordination: replay, attach, or start new work.
//!
//! ```text
//! open_stream(id)
//!   ├─ cache hit (terminal, same owner)  → replay terminal event
//!   ├─ store hit, terminal               → replay terminal event
//!   ├─ store hit, in flight              → attach (poll store + cache)
//!   └─ miss → create entry
//!        ├─ platform dispatch ok         → attach
//!        └─ no platform / dispatch error → sync fallback inline
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, instrument, warn};

use coachgen_ai::{ErrorCategory, GenerationParams, Generator};
use coachgen_core::{Clock, RequestId, SystemClock, UserId};

use crate::cache::{CacheConfig, CacheStatus, CachedResult, ReconnectionCache};
use crate::fallback::SyncFallbackExecutor;
use crate::progress::{
    ProgressEmitter, ProgressEvent, SYNTHETIC_CEILING, SyntheticSchedule, SyntheticTicker,
};
use crate::queue::{QueueEntry, QueueStatus, QueueStore, QueueStoreError};
use crate::worker::{
    ExecutionPlatform, GenerationRequested, GenerationWorker, InProcessPlatform, RetryPolicy,
};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Ceiling timeout for one generation call.
    pub ceiling: Duration,
    pub retry: RetryPolicy,
    /// How often an attached stream re-reads the cache and store.
    pub poll_interval: Duration,
    pub schedule: SyntheticSchedule,
    /// When an attached stream gives up; derived from ceiling and attempts
    /// when unset.
    pub stream_deadline: Option<Duration>,
    /// How long an attached stream waits for this process's cache slot to
    /// catch up once the store already reports a terminal status.
    pub settle_grace: Duration,
    pub cache: CacheConfig,
    /// Run work on the in-process background platform. `false` means every
    /// request goes through the sync fallback.
    pub background: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ceiling: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(1),
            schedule: SyntheticSchedule::default(),
            stream_deadline: None,
            settle_grace: Duration::from_secs(2),
            cache: CacheConfig::default(),
            background: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_schedule(mut self, schedule: SyntheticSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_stream_deadline(mut self, deadline: Duration) -> Self {
        self.stream_deadline = Some(deadline);
        self
    }

    pub fn with_settle_grace(mut self, grace: Duration) -> Self {
        self.settle_grace = grace;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn effective_stream_deadline(&self) -> Duration {
        self.stream_deadline.unwrap_or_else(|| {
            self.ceiling.saturating_mul(self.retry.attempts()) + Duration::from_secs(60)
        })
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("request {0} belongs to another user")]
    Forbidden(RequestId),

    #[error("request {0} not found")]
    NotFound(RequestId),

    #[error(transparent)]
    Store(#[from] QueueStoreError),
}

pub struct Orchestrator {
    store: Arc<dyn QueueStore>,
    cache: Arc<ReconnectionCache>,
    platform: Option<Arc<dyn ExecutionPlatform>>,
    fallback: Arc<SyncFallbackExecutor>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn QueueStore>,
        generator: Arc<dyn Generator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self::with_clock(store, generator, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn QueueStore>,
        generator: Arc<dyn Generator>,
        config: OrchestratorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Arc::new(ReconnectionCache::new(clock.clone(), config.cache.clone()));
        let worker = Arc::new(GenerationWorker::new(
            store.clone(),
            generator,
            cache.clone(),
            config.ceiling,
        ));
        let platform = config.background.then(|| {
            let platform = InProcessPlatform::new(worker.clone(), config.retry.clone());
            Arc::new(platform) as Arc<dyn ExecutionPlatform>
        });
        let fallback = Arc::new(SyncFallbackExecutor::new(
            worker,
            store.clone(),
            cache.clone(),
            config.schedule.clone(),
            clock.clone(),
        ));
        Self {
            store,
            cache,
            platform,
            fallback,
            clock,
            config,
        }
    }

    /// Replace the execution platform; `None` forces the sync fallback.
    pub fn with_platform(mut self, platform: Option<Arc<dyn ExecutionPlatform>>) -> Self {
        self.platform = platform;
        self
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ReconnectionCache> {
        &self.cache
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Opens the event stream for `request_id`. Errors are returned only
    /// before streaming starts; afterwards every failure is a terminal
    /// `error` event on the stream.
    #[instrument(skip_all, fields(request_id = %request_id, user_id = %user_id))]
    pub async fn open_stream(
        &self,
        request_id: RequestId,
        user_id: UserId,
        params: GenerationParams,
    ) -> Result<UnboundedReceiver<ProgressEvent>, OrchestratorError> {
        let (emitter, rx) = ProgressEmitter::channel();

        if let Some(hit) = self.cache.get(&request_id) {
            if hit.is_terminal() && hit.owned_by(user_id) {
                debug!("replaying cached result");
                emitter.finish(cached_terminal(hit));
                return Ok(rx);
            }
        }

        if let Some(entry) = self.store.get_by_request_id(&request_id).await? {
            self.resume(entry, user_id, emitter)?;
            return Ok(rx);
        }

        let enqueued = self.store.create(&request_id, user_id, params.clone()).await?;
        if !enqueued.created {
            self.resume(enqueued.entry, user_id, emitter)?;
            return Ok(rx);
        }

        self.cache.start(&request_id, user_id);
        emitter.milestone(ProgressEvent::starting());

        let event = GenerationRequested::new(request_id, user_id, params);
        match &self.platform {
            Some(platform) => match platform.dispatch(event.clone()).await {
                Ok(()) => {
                    info!("generation dispatched to background platform");
                    self.attach(event.request_id, emitter);
                }
                Err(err) => {
                    warn!(error = %err, "dispatch failed; running inline");
                    self.run_inline(event, emitter);
                }
            },
            None => {
                info!("no background platform; running inline");
                self.run_inline(event, emitter);
            }
        }
        Ok(rx)
    }

    /// Queue entry for `request_id`, if `user_id` owns it.
    pub async fn get_status(
        &self,
        request_id: &RequestId,
        user_id: UserId,
    ) -> Result<QueueEntry, OrchestratorError> {
        let entry = self
            .store
            .get_by_request_id(request_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(request_id.clone()))?;
        if entry.user_id != user_id {
            return Err(OrchestratorError::Forbidden(request_id.clone()));
        }
        Ok(entry)
    }

    fn resume(
        &self,
        entry: QueueEntry,
        user_id: UserId,
        emitter: ProgressEmitter,
    ) -> Result<(), OrchestratorError> {
        if entry.user_id != user_id {
            return Err(OrchestratorError::Forbidden(entry.request_id));
        }
        if let Some(terminal) = entry_terminal(&entry) {
            debug!(status = %entry.status, "replaying stored result");
            emitter.finish(terminal);
            return Ok(());
        }
        debug!(progress = entry.progress_percent, "attaching to in-flight generation");
        emitter.milestone(ProgressEvent::new(
            entry.current_phase.clone(),
            entry.progress_percent.min(SYNTHETIC_CEILING - 1),
            entry.current_phase.clone(),
        ));
        self.attach(entry.request_id, emitter);
        Ok(())
    }

    fn run_inline(&self, event: GenerationRequested, emitter: ProgressEmitter) {
        let fallback = self.fallback.clone();
        tokio::spawn(async move { fallback.run(event, emitter).await });
    }

    fn attach(&self, request_id: RequestId, emitter: ProgressEmitter) {
        let follow = Follow {
            store: self.store.clone(),
            cache: self.cache.clone(),
            clock: self.clock.clone(),
            schedule: self.config.schedule.clone(),
            poll_interval: self.config.poll_interval,
            settle_grace: self.config.settle_grace,
            deadline: self.config.effective_stream_deadline(),
        };
        tokio::spawn(follow.run(request_id, emitter));
    }
}

/// Streams work that runs somewhere else: synthetic ticks plus whatever the
/// cache and store report, until the entry settles or the deadline passes.
struct Follow {
    store: Arc<dyn QueueStore>,
    cache: Arc<ReconnectionCache>,
    clock: Arc<dyn Clock>,
    schedule: SyntheticSchedule,
    poll_interval: Duration,
    settle_grace: Duration,
    deadline: Duration,
}

impl Follow {
    async fn run(self, request_id: RequestId, emitter: ProgressEmitter) {
        let _ticker =
            SyntheticTicker::spawn(emitter.clone(), self.schedule.clone(), self.clock.clone());
        let started = self.clock.now();
        let deadline = started + self.deadline;
        let mut next_poll = started;
        let mut settle_by = None;

        loop {
            if emitter.is_closed() {
                debug!(
                    request_id = %request_id,
                    "client detached; work continues in the background"
                );
                return;
            }
            let mut settling = false;

            if let Some(hit) = self.cache.get(&request_id).filter(CachedResult::is_terminal) {
                emitter.finish(cached_terminal(hit));
                return;
            }

            match self.store.get_by_request_id(&request_id).await {
                Ok(Some(entry)) => {
                    if let Some(terminal) = entry_terminal(&entry) {
                        // The worker commits the store before the cache, so
                        // a slot still open here is about to receive the
                        // full result.
                        let now = self.clock.now();
                        let until = *settle_by.get_or_insert(now + self.settle_grace);
                        match self.cache.get(&request_id) {
                            Some(hit) if hit.is_terminal() => {
                                emitter.finish(cached_terminal(hit));
                                return;
                            }
                            Some(_) if now < until => {
                                debug!(
                                    request_id = %request_id,
                                    "store settled; waiting for the cached result"
                                );
                                settling = true;
                            }
                            _ => {
                                emitter.finish(terminal);
                                return;
                            }
                        }
                    } else {
                        let shown = entry.progress_percent.min(SYNTHETIC_CEILING - 1);
                        if shown > emitter.progress() {
                            emitter.milestone(ProgressEvent::new(
                                entry.current_phase.clone(),
                                shown,
                                entry.current_phase.clone(),
                            ));
                        }
                    }
                }
                Ok(None) => {
                    warn!(request_id = %request_id, "queue entry disappeared while streaming");
                    let category = ErrorCategory::Storage;
                    emitter.finish(ProgressEvent::failed(
                        0,
                        Some(category),
                        category.user_message(),
                    ));
                    return;
                }
                Err(err) => warn!(request_id = %request_id, error = %err, "poll failed; retrying"),
            }

            if !settling && self.clock.now() >= deadline {
                warn!(
                    request_id = %request_id,
                    deadline = ?self.deadline,
                    "stream deadline passed"
                );
                let category = ErrorCategory::Timeout;
                emitter.finish(ProgressEvent::failed(
                    0,
                    Some(category),
                    category.user_message(),
                ));
                return;
            }

            next_poll += self.poll_interval;
            tokio::select! {
                () = self.clock.sleep_until(next_poll) => {}
                () = emitter.client_gone() => {}
            }
        }
    }
}

fn cached_terminal(hit: CachedResult) -> ProgressEvent {
    match hit.status {
        CacheStatus::Error => {
            ProgressEvent::failed(0, None, hit.error_message.unwrap_or_default())
        }
        CacheStatus::Complete | CacheStatus::Started => {
            ProgressEvent::complete(hit.result_ref.unwrap_or_default(), hit.payload, hit.extras)
        }
    }
}

fn entry_terminal(entry: &QueueEntry) -> Option<ProgressEvent> {
    match entry.status {
        QueueStatus::Completed => Some(ProgressEvent::complete(
            entry.result_ref.clone().unwrap_or_default(),
            None,
            None,
        )),
        QueueStatus::Failed => Some(ProgressEvent::failed(
            entry.progress_percent,
            None,
            entry.error_message.clone().unwrap_or_default(),
        )),
        QueueStatus::Pending | QueueStatus::InProgress => None,
    }
}
