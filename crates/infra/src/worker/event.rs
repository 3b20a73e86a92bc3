//! Background execution trigger.

use serde::{Deserialize, Serialize};

use coachgen_ai::GenerationParams;
use coachgen_core::{RequestId, UserId};

/// `{requestId, userId, params}`, delivered at least once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequested {
    pub request_id: RequestId,
    pub user_id: UserId,
    pub params: GenerationParams,
}

impl GenerationRequested {
    pub fn new(request_id: RequestId, user_id: UserId, params: GenerationParams) -> Self {
        Self {
            request_id,
            user_id,
            params,
        }
    }
}

/// Which attempt of how many the worker is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    pub attempt: u32,
    pub max_attempts: u32,
}

impl AttemptContext {
    pub fn new(attempt: u32, max_attempts: u32) -> Self {
        Self {
            attempt,
            max_attempts: max_attempts.max(1),
        }
    }

    /// One attempt, no retries.
    pub fn single() -> Self {
        Self::new(1, 1)
    }

    pub fn is_final(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_is_camel_case() {
        let user = UserId::new();
        let event = GenerationRequested::new(
            RequestId::parse("r1").unwrap(),
            user,
            GenerationParams::new("workout_plan", json!({"days": 3})),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["requestId"], "r1");
        assert_eq!(value["userId"], user.to_string());
        assert_eq!(value["params"]["kind"], "workout_plan");

        let back: GenerationRequested = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn final_attempt() {
        assert!(AttemptContext::single().is_final());
        assert!(!AttemptContext::new(2, 3).is_final());
        assert!(AttemptContext::new(3, 3).is_final());
    }
}
