use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use coachgen_ai::{ErrorCategory, GenerationOutput};

/// Progress shown with the `finalize` milestone, above the synthetic ceiling.
pub const FINALIZE_PROGRESS: u8 = 95;

pub mod phases {
    pub const STARTING: &str = "starting";
    pub const FINALIZE: &str = "finalize";
    pub const COMPLETE: &str = "complete";
    pub const ERROR: &str = "error";
}

/// One line of the streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub phase: String,
    pub progress: u8,
    pub message: String,
    /// Estimated seconds remaining, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
}

impl ProgressEvent {
    pub fn new(phase: impl Into<String>, progress: u8, message: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            progress: progress.min(100),
            message: message.into(),
            eta: None,
            result_ref: None,
            result: None,
            extras: None,
            error: None,
            category: None,
        }
    }

    pub fn with_eta(mut self, eta_secs: Option<u64>) -> Self {
        self.eta = eta_secs;
        self
    }

    pub fn starting() -> Self {
        Self::new(phases::STARTING, 0, "Getting started")
    }

    pub fn finalize() -> Self {
        Self::new(phases::FINALIZE, FINALIZE_PROGRESS, "Putting the finishing touches on your plan")
    }

    pub fn complete(
        result_ref: impl Into<String>,
        result: Option<JsonValue>,
        extras: Option<JsonValue>,
    ) -> Self {
        let mut ev = Self::new(phases::COMPLETE, 100, "Your plan is ready");
        ev.result_ref = Some(result_ref.into());
        ev.result = result;
        ev.extras = extras;
        ev
    }

    pub fn completed(output: &GenerationOutput) -> Self {
        Self::complete(
            output.result_ref.clone(),
            Some(output.payload.clone()),
            output.extras.clone(),
        )
    }

    /// Terminal error. `message` must already be user-facing.
    pub fn failed(
        progress: u8,
        category: Option<ErrorCategory>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let mut ev = Self::new(phases::ERROR, progress, message.clone());
        ev.error = Some(message);
        ev.category = category;
        ev
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == phases::COMPLETE || self.phase == phases::ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn optional_fields_are_omitted_on_the_wire() {
        let line = serde_json::to_value(ProgressEvent::new("preparing", 4, "Warming up")).unwrap();
        assert_eq!(line, json!({"phase": "preparing", "progress": 4, "message": "Warming up"}));
    }

    #[test]
    fn terminal_events_carry_their_fields() {
        let done = serde_json::to_value(ProgressEvent::complete("art-1", None, None)).unwrap();
        assert_eq!(done["phase"], "complete");
        assert_eq!(done["resultRef"], "art-1");

        let err = ProgressEvent::failed(40, Some(ErrorCategory::Timeout), "Try again later");
        assert!(err.is_terminal());
        let err = serde_json::to_value(err).unwrap();
        assert_eq!(err["error"], "Try again later");
        assert_eq!(err["category"], "timeout");
    }
}
