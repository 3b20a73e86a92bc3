//! Progress channel: synthetic ticks and real milestones multiplexed onto
//! one client-facing event stream.
//!
//! - `event`: wire format (`{phase, progress, message, eta?}` + terminal fields)
//! - `schedule`: pure synthetic-progress bands
//! - `emitter`: single writer guarding ordering and the terminal event
//! - `ticker`: cancellable periodic driver of the schedule

pub mod emitter;
pub mod event;
pub mod schedule;
pub mod ticker;

pub use emitter::ProgressEmitter;
pub use event::{FINALIZE_PROGRESS, ProgressEvent, phases};
pub use schedule::{Band, SYNTHETIC_CEILING, SyntheticSchedule, SyntheticStep};
pub use ticker::SyntheticTicker;
