//! `coachgen-ai`
//!
//! **Responsibility:** boundary to the slow, unreliable generation call.
//!
//! The orchestrator treats generation as an opaque long-running function:
//! - it receives [`GenerationParams`] and a [`ProgressSink`],
//! - it returns a [`GenerationOutput`] carrying a reference to the persisted artifact,
//! - it fails with a tagged [`GenerationError`] whose [`ErrorCategory`] drives
//!   retries and user-facing messages.

pub mod generator;
pub mod progress;
pub mod result;
pub mod simulated;

pub use generator::{GenerationParams, Generator};
pub use progress::{ChannelProgressSink, NoopProgressSink, ProgressSink, ProgressUpdate};
pub use result::{ErrorCategory, GenerationError, GenerationOutput};
pub use simulated::SimulatedGenerator;
