//! Infrastructure for the generation-job orchestrator.
//!
//! - [`queue`]: durable queue store (in-memory and Postgres)
//! - [`cache`]: process-local reconnection cache
//! - [`progress`]: streaming events, synthetic schedule, ticker, emitter
//! - [`worker`]: background worker, retry policy, execution platform
//! - [`fallback`]: inline executor used without a platform
//! - [`orchestrator`]: per-request entry point

pub mod cache;
pub mod fallback;
pub mod orchestrator;
pub mod progress;
pub mod queue;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheConfig, CacheStatus, CachedResult, ReconnectionCache};
pub use fallback::{INTERRUPTED_MESSAGE, SyncFallbackExecutor};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError};
pub use progress::{ProgressEmitter, ProgressEvent, SyntheticSchedule};
pub use queue::{
    InMemoryQueueStore, PostgresQueueStore, QueueEntry, QueueStatus, QueueStore, QueueStoreError,
};
pub use worker::{
    AttemptContext, ExecutionPlatform, GenerationRequested, GenerationWorker, InProcessPlatform,
    PlatformError, RetryPolicy, WorkerOutcome,
};
