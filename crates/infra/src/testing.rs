//! Test doubles shared by the infra unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use coachgen_ai::{
    GenerationError, GenerationOutput, GenerationParams, Generator, ProgressSink, ProgressUpdate,
};
use coachgen_core::{RequestId, UserId};

use crate::queue::{
    Enqueued, InMemoryQueueStore, ProgressWrite, QueueEntry, QueueStore, QueueStoreError,
    Transition,
};

pub fn rid(raw: &str) -> RequestId {
    RequestId::parse(raw).unwrap()
}

/// Generator that sleeps, reports scripted milestones, then plays the next
/// scripted outcome (the last one repeats).
pub struct ScriptedGenerator {
    delay: Duration,
    milestones: Vec<(String, u32)>,
    outcomes: Mutex<VecDeque<Result<GenerationOutput, GenerationError>>>,
    calls: AtomicU32,
}

impl ScriptedGenerator {
    pub fn sequence(
        delay: Duration,
        outcomes: Vec<Result<GenerationOutput, GenerationError>>,
    ) -> Self {
        assert!(!outcomes.is_empty());
        Self {
            delay,
            milestones: Vec::new(),
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn succeeding(delay: Duration, result_ref: &str) -> Self {
        let output = GenerationOutput::new(result_ref).with_payload(json!({"id": result_ref}));
        Self::sequence(delay, vec![Ok(output)])
    }

    pub fn failing(delay: Duration, err: GenerationError) -> Self {
        Self::sequence(delay, vec![Err(err)])
    }

    pub fn with_milestones(mut self, milestones: &[(&str, u32)]) -> Self {
        self.milestones = milestones.iter().map(|(p, v)| (p.to_string(), *v)).collect();
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Result<GenerationOutput, GenerationError> {
        let mut outcomes = self.outcomes.lock();
        if outcomes.len() > 1 {
            outcomes.pop_front().unwrap()
        } else {
            outcomes.front().cloned().unwrap()
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        _params: &GenerationParams,
        progress: &dyn ProgressSink,
    ) -> Result<GenerationOutput, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for (phase, percent) in &self.milestones {
            progress.report(ProgressUpdate::new(phase.clone(), *percent, phase.clone()));
        }
        tokio::time::sleep(self.delay).await;
        self.next_outcome()
    }
}

/// In-memory store whose progress writes always fail.
#[derive(Default)]
pub struct FlakyProgressStore {
    inner: InMemoryQueueStore,
}

impl FlakyProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for FlakyProgressStore {
    async fn create(
        &self,
        request_id: &RequestId,
        user_id: UserId,
        context: GenerationParams,
    ) -> Result<Enqueued, QueueStoreError> {
        self.inner.create(request_id, user_id, context).await
    }

    async fn get_by_request_id(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<QueueEntry>, QueueStoreError> {
        self.inner.get_by_request_id(request_id).await
    }

    async fn mark_started(&self, request_id: &RequestId) -> Result<Transition, QueueStoreError> {
        self.inner.mark_started(request_id).await
    }

    async fn update_progress(
        &self,
        _request_id: &RequestId,
        _percent: u8,
        _phase: &str,
    ) -> Result<ProgressWrite, QueueStoreError> {
        Err(QueueStoreError::Storage("connection reset by peer".to_string()))
    }

    async fn record_retry(
        &self,
        request_id: &RequestId,
        message: &str,
    ) -> Result<Transition, QueueStoreError> {
        self.inner.record_retry(request_id, message).await
    }

    async fn mark_completed(
        &self,
        request_id: &RequestId,
        result_ref: &str,
    ) -> Result<Transition, QueueStoreError> {
        self.inner.mark_completed(request_id, result_ref).await
    }

    async fn mark_failed(
        &self,
        request_id: &RequestId,
        error_message: &str,
    ) -> Result<Transition, QueueStoreError> {
        self.inner.mark_failed(request_id, error_message).await
    }
}

/// In-memory store that commits completions immediately but acknowledges
/// them only after `ack_delay`, like a database round trip.
pub struct SlowAckStore {
    inner: InMemoryQueueStore,
    ack_delay: Duration,
}

impl SlowAckStore {
    pub fn new(ack_delay: Duration) -> Self {
        Self {
            inner: InMemoryQueueStore::new(),
            ack_delay,
        }
    }
}

#[async_trait]
impl QueueStore for SlowAckStore {
    async fn create(
        &self,
        request_id: &RequestId,
        user_id: UserId,
        context: GenerationParams,
    ) -> Result<Enqueued, QueueStoreError> {
        self.inner.create(request_id, user_id, context).await
    }

    async fn get_by_request_id(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<QueueEntry>, QueueStoreError> {
        self.inner.get_by_request_id(request_id).await
    }

    async fn mark_started(&self, request_id: &RequestId) -> Result<Transition, QueueStoreError> {
        self.inner.mark_started(request_id).await
    }

    async fn update_progress(
        &self,
        request_id: &RequestId,
        percent: u8,
        phase: &str,
    ) -> Result<ProgressWrite, QueueStoreError> {
        self.inner.update_progress(request_id, percent, phase).await
    }

    async fn record_retry(
        &self,
        request_id: &RequestId,
        message: &str,
    ) -> Result<Transition, QueueStoreError> {
        self.inner.record_retry(request_id, message).await
    }

    async fn mark_completed(
        &self,
        request_id: &RequestId,
        result_ref: &str,
    ) -> Result<Transition, QueueStoreError> {
        let transition = self.inner.mark_completed(request_id, result_ref).await;
        tokio::time::sleep(self.ack_delay).await;
        transition
    }

    async fn mark_failed(
        &self,
        request_id: &RequestId,
        error_message: &str,
    ) -> Result<Transition, QueueStoreError> {
        self.inner.mark_failed(request_id, error_message).await
    }
}
