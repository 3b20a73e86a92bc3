//! Cancellable periodic driver for the synthetic schedule.

use std::sync::Arc;

use tokio::task::JoinHandle;

use coachgen_core::Clock;

use super::emitter::ProgressEmitter;
use super::event::ProgressEvent;
use super::schedule::SyntheticSchedule;

/// Background task feeding synthetic ticks into an emitter.
///
/// Deadlines are absolute (`start + Σ delays`) so a slow consumer or a
/// manually advanced clock never shifts the schedule. Dropping the ticker
/// aborts the task.
#[derive(Debug)]
pub struct SyntheticTicker {
    handle: JoinHandle<()>,
}

impl SyntheticTicker {
    pub fn spawn(
        emitter: ProgressEmitter,
        schedule: SyntheticSchedule,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut deadline = clock.now();
        let handle = tokio::spawn(async move {
            loop {
                let step = schedule.step(emitter.progress());
                deadline += step.delay;
                clock.sleep_until(deadline).await;

                let event = ProgressEvent::new(step.phase, step.progress, step.message)
                    .with_eta(step.eta_secs);
                if !emitter.synthetic(event)
                    && (!emitter.synthetic_active() || emitter.is_closed())
                {
                    break;
                }
            }
        });
        Self { handle }
    }

    /// Stop ticking. The emitter must already refuse synthetic writes
    /// (`stop_synthetic`/`finish`) for the cut-off to be exact.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SyntheticTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
