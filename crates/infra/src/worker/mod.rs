//! Background execution of generation requests.
//!
//! - [`GenerationWorker`]: the three checkpointed steps (start, execute,
//!   finish) run once per attempt.
//! - [`ExecutionPlatform`]: where attempts run; [`InProcessPlatform`] drives
//!   them on tokio tasks under a [`RetryPolicy`].
//!
//! Delivery is at-least-once: every step tolerates being repeated for the
//! same request id.

pub mod event;
pub mod executor;
pub mod platform;
pub mod retry;

pub use event::{AttemptContext, GenerationRequested};
pub use executor::{GenerationWorker, StartCheckpoint, WorkerOutcome};
pub use platform::{ExecutionPlatform, InProcessPlatform, PlatformError};
pub use retry::{BackoffStrategy, RetryPolicy};
