//! Queue entry model and its state transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coachgen_ai::GenerationParams;
use coachgen_core::{RequestId, UserId};

use super::store::QueueStoreError;

/// Lifecycle status of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Created, no worker has started yet
    Pending,
    /// A worker (background or inline) is generating
    InProgress,
    /// Artifact produced; terminal
    Completed,
    /// Gave up; terminal
    Failed,
}

impl QueueStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(QueueStatus::Pending),
            "in_progress" => Some(QueueStatus::InProgress),
            "completed" => Some(QueueStatus::Completed),
            "failed" => Some(QueueStatus::Failed),
            _ => None,
        }
    }
}

impl core::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a status transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The entry was already in the requested state (redelivered call).
    Unchanged,
}

/// Outcome of a progress write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressWrite {
    Applied,
    /// Lower than the stored value; ignored.
    Stale,
    /// Entry is terminal; ignored.
    Terminal,
}

/// One generation attempt, keyed by its idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub request_id: RequestId,
    pub user_id: UserId,
    pub status: QueueStatus,
    pub progress_percent: u8,
    pub current_phase: String,
    pub context: GenerationParams,
    /// Set only once `Completed`.
    pub result_ref: Option<String>,
    /// Set only once `Failed`; always a user-facing message.
    pub error_message: Option<String>,
    /// Categorized message of the latest failed attempt that was retried.
    pub last_attempt_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(request_id: RequestId, user_id: UserId, context: GenerationParams) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            user_id,
            status: QueueStatus::Pending,
            progress_percent: 0,
            current_phase: "queued".to_string(),
            context,
            result_ref: None,
            error_message: None,
            last_attempt_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `pending → in_progress`, with a readable progress value from the start.
    pub fn start(&mut self) -> Transition {
        if self.status != QueueStatus::Pending {
            return Transition::Unchanged;
        }
        self.status = QueueStatus::InProgress;
        self.current_phase = "starting".to_string();
        self.touch();
        Transition::Applied
    }

    /// Compare-and-set progress write: only a value `>=` the stored one lands.
    pub fn advance(&mut self, percent: u8, phase: &str) -> ProgressWrite {
        if self.is_terminal() {
            return ProgressWrite::Terminal;
        }
        let percent = percent.min(100);
        if percent < self.progress_percent {
            return ProgressWrite::Stale;
        }
        self.progress_percent = percent;
        self.current_phase = phase.to_string();
        self.touch();
        ProgressWrite::Applied
    }

    /// Note a failed attempt that will be retried. Status is untouched.
    pub fn record_retry(&mut self, message: &str) -> Transition {
        if self.is_terminal() {
            return Transition::Unchanged;
        }
        self.last_attempt_error = Some(message.to_string());
        self.current_phase = "retrying".to_string();
        self.touch();
        Transition::Applied
    }

    pub fn complete(&mut self, result_ref: &str) -> Result<Transition, QueueStoreError> {
        match self.status {
            QueueStatus::InProgress => {
                self.status = QueueStatus::Completed;
                self.progress_percent = 100;
                self.current_phase = "complete".to_string();
                self.result_ref = Some(result_ref.to_string());
                self.touch();
                Ok(Transition::Applied)
            }
            QueueStatus::Completed => Ok(Transition::Unchanged),
            from => Err(QueueStoreError::InvalidTransition {
                request_id: self.request_id.clone(),
                from,
                to: QueueStatus::Completed,
            }),
        }
    }

    pub fn fail(&mut self, error_message: &str) -> Result<Transition, QueueStoreError> {
        match self.status {
            QueueStatus::InProgress => {
                self.status = QueueStatus::Failed;
                self.current_phase = "error".to_string();
                self.error_message = Some(error_message.to_string());
                self.touch();
                Ok(Transition::Applied)
            }
            QueueStatus::Failed => Ok(Transition::Unchanged),
            from => Err(QueueStoreError::InvalidTransition {
                request_id: self.request_id.clone(),
                from,
                to: QueueStatus::Failed,
            }),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
