use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// A real progress milestone reported by the generation function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub phase: String,
    /// Always within `0..=100`.
    pub percent: u8,
    pub message: String,
}

impl ProgressUpdate {
    pub fn new(phase: impl Into<String>, percent: u32, message: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            percent: percent.min(100) as u8,
            message: message.into(),
        }
    }
}

/// Where the generation function sends progress.
///
/// Reporting is fire-and-forget: a sink must never surface its own failures
/// to the generation call.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Sink that forwards updates into a channel drained by someone else
/// (a queue-store writer, a streaming response, ...).
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    tx: UnboundedSender<ProgressUpdate>,
}

impl ChannelProgressSink {
    pub fn new(tx: UnboundedSender<ProgressUpdate>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn report(&self, update: ProgressUpdate) {
        if self.tx.send(update).is_err() {
            tracing::debug!("progress receiver dropped; update discarded");
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn report(&self, _update: ProgressUpdate) {}
}
