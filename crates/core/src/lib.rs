//! `coachgen-core`: shared building blocks for the generation orchestrator.
//!
//! Pure primitives only: identifiers, the domain error model, and the clock
//! abstraction that time-driven components are written against.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DomainError;
pub use id::{RequestId, UserId};
