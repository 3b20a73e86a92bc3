//! Single writer for one client stream.
//!
//! Every event goes through one lock, so a synthetic tick can never be
//! written after (or between) the terminal events: `finish` shuts the
//! synthetic source off and drops the sender while holding that lock.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use super::event::{FINALIZE_PROGRESS, ProgressEvent, phases};

#[derive(Debug)]
struct EmitterState {
    tx: Option<UnboundedSender<ProgressEvent>>,
    last_progress: u8,
    synthetic_open: bool,
}

/// Cloneable handle writing into one client's event stream.
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    state: Arc<Mutex<EmitterState>>,
}

impl ProgressEmitter {
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = unbounded_channel();
        let emitter = Self {
            state: Arc::new(Mutex::new(EmitterState {
                tx: Some(tx),
                last_progress: 0,
                synthetic_open: true,
            })),
        };
        (emitter, rx)
    }

    /// Highest progress value written so far.
    pub fn progress(&self) -> u8 {
        self.state.lock().last_progress
    }

    pub fn synthetic_active(&self) -> bool {
        let state = self.state.lock();
        state.synthetic_open && state.tx.is_some()
    }

    /// `true` once a terminal event was written or the client went away.
    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .tx
            .as_ref()
            .is_none_or(|tx| tx.is_closed())
    }

    /// Write a synthetic tick; dropped once the synthetic source is stopped.
    pub fn synthetic(&self, event: ProgressEvent) -> bool {
        let mut state = self.state.lock();
        if !state.synthetic_open {
            return false;
        }
        Self::send(&mut state, event)
    }

    /// Write a real, non-terminal milestone. Values below what the client
    /// has already seen are dropped, as are terminal events (see `finish`).
    pub fn milestone(&self, event: ProgressEvent) -> bool {
        if event.is_terminal() {
            return false;
        }
        let mut state = self.state.lock();
        Self::send(&mut state, event)
    }

    /// Stop accepting synthetic ticks. Idempotent.
    pub fn stop_synthetic(&self) {
        self.state.lock().synthetic_open = false;
    }

    /// Write the terminal event and close the stream.
    ///
    /// A `complete` event is preceded by `finalize` when the client has not
    /// seen it yet; an `error` event reports the last progress shown.
    /// Returns `false` when the stream was already finished.
    pub fn finish(&self, mut event: ProgressEvent) -> bool {
        let mut state = self.state.lock();
        state.synthetic_open = false;
        let Some(tx) = state.tx.take() else {
            return false;
        };

        if event.phase == phases::COMPLETE && state.last_progress < FINALIZE_PROGRESS {
            let _ = tx.send(ProgressEvent::finalize());
        }
        if event.phase == phases::ERROR {
            event.progress = state.last_progress;
        }
        state.last_progress = state.last_progress.max(event.progress);
        tx.send(event).is_ok()
    }

    /// Resolves when the receiving side is dropped (client disconnect), or
    /// right away when the stream is already finished.
    pub async fn client_gone(&self) {
        let tx = self.state.lock().tx.clone();
        if let Some(tx) = tx {
            tx.closed().await;
        }
    }

    fn send(state: &mut EmitterState, event: ProgressEvent) -> bool {
        let Some(tx) = state.tx.as_ref() else {
            return false;
        };
        if event.progress < state.last_progress {
            return false;
        }
        let progress = event.progress;
        if tx.send(event).is_err() {
            return false;
        }
        state.last_progress = progress;
        true
    }
}
