//! Queue Store: the durable record of one generation attempt per request id.
//!
//! ## Design
//!
//! - One entry per `RequestId`; creation is create-if-absent (first writer wins)
//! - Status moves `pending → in_progress → {completed | failed}` and never leaves a terminal state
//! - `progress_percent` is guarded by a compare-and-set so stale writers cannot regress it
//! - Source of truth for status/progress across processes; caches sit in front of it
//!
//! ## Components
//!
//! - `QueueEntry`: one generation attempt and its pure state transitions
//! - `QueueStore`: async persistence boundary
//! - `InMemoryQueueStore`: single-process store for tests/dev
//! - `PostgresQueueStore`: durable store

pub mod postgres;
pub mod store;
pub mod types;

pub use postgres::PostgresQueueStore;
pub use store::{Enqueued, InMemoryQueueStore, QueueStore, QueueStoreError};
pub use types::{ProgressWrite, QueueEntry, QueueStatus, Transition};
