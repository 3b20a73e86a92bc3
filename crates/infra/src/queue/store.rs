//! Queue store boundary and the in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use coachgen_ai::{GenerationError, GenerationParams};
use coachgen_core::{RequestId, UserId};

use super::types::{ProgressWrite, QueueEntry, QueueStatus, Transition};

/// Result of `create`: the stored entry and whether this call inserted it.
#[derive(Debug, Clone, PartialEq)]
pub struct Enqueued {
    pub entry: QueueEntry,
    pub created: bool,
}

/// Queue store abstraction.
///
/// Consumed by both the orchestrator and the background worker. Every
/// operation is safe under concurrent callers without an external lock.
#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
    /// Create-if-absent. An existing entry is returned unchanged.
    async fn create(
        &self,
        request_id: &RequestId,
        user_id: UserId,
        context: GenerationParams,
    ) -> Result<Enqueued, QueueStoreError>;

    async fn get_by_request_id(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<QueueEntry>, QueueStoreError>;

    /// `pending → in_progress` with an initial progress of 0.
    async fn mark_started(&self, request_id: &RequestId) -> Result<Transition, QueueStoreError>;

    /// Writes only if `percent` is not below the stored value.
    async fn update_progress(
        &self,
        request_id: &RequestId,
        percent: u8,
        phase: &str,
    ) -> Result<ProgressWrite, QueueStoreError>;

    /// Record the categorized message of an attempt that will be retried.
    async fn record_retry(
        &self,
        request_id: &RequestId,
        message: &str,
    ) -> Result<Transition, QueueStoreError>;

    async fn mark_completed(
        &self,
        request_id: &RequestId,
        result_ref: &str,
    ) -> Result<Transition, QueueStoreError>;

    async fn mark_failed(
        &self,
        request_id: &RequestId,
        error_message: &str,
    ) -> Result<Transition, QueueStoreError>;
}

/// Queue store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueStoreError {
    #[error("queue entry not found: {0}")]
    NotFound(RequestId),
    #[error("invalid transition for {request_id}: {from} -> {to}")]
    InvalidTransition {
        request_id: RequestId,
        from: QueueStatus,
        to: QueueStatus,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<QueueStoreError> for GenerationError {
    fn from(err: QueueStoreError) -> Self {
        GenerationError::storage(err.to_string())
    }
}

/// In-memory queue store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    entries: RwLock<HashMap<RequestId, QueueEntry>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn with_entry<T>(
        &self,
        request_id: &RequestId,
        f: impl FnOnce(&mut QueueEntry) -> Result<T, QueueStoreError>,
    ) -> Result<T, QueueStoreError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(request_id)
            .ok_or_else(|| QueueStoreError::NotFound(request_id.clone()))?;
        f(entry)
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn create(
        &self,
        request_id: &RequestId,
        user_id: UserId,
        context: GenerationParams,
    ) -> Result<Enqueued, QueueStoreError> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(request_id) {
            return Ok(Enqueued {
                entry: existing.clone(),
                created: false,
            });
        }
        let entry = QueueEntry::new(request_id.clone(), user_id, context);
        entries.insert(request_id.clone(), entry.clone());
        Ok(Enqueued {
            entry,
            created: true,
        })
    }

    async fn get_by_request_id(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<QueueEntry>, QueueStoreError> {
        Ok(self.entries.read().get(request_id).cloned())
    }

    async fn mark_started(&self, request_id: &RequestId) -> Result<Transition, QueueStoreError> {
        self.with_entry(request_id, |e| Ok(e.start()))
    }

    async fn update_progress(
        &self,
        request_id: &RequestId,
        percent: u8,
        phase: &str,
    ) -> Result<ProgressWrite, QueueStoreError> {
        self.with_entry(request_id, |e| Ok(e.advance(percent, phase)))
    }

    async fn record_retry(
        &self,
        request_id: &RequestId,
        message: &str,
    ) -> Result<Transition, QueueStoreError> {
        self.with_entry(request_id, |e| Ok(e.record_retry(message)))
    }

    async fn mark_completed(
        &self,
        request_id: &RequestId,
        result_ref: &str,
    ) -> Result<Transition, QueueStoreError> {
        self.with_entry(request_id, |e| e.complete(result_ref))
    }

    async fn mark_failed(
        &self,
        request_id: &RequestId,
        error_message: &str,
    ) -> Result<Transition, QueueStoreError> {
        self.with_entry(request_id, |e| e.fail(error_message))
    }
}
