use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Successful generation: a reference to the persisted artifact plus the
/// payload handed to a waiting client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutput {
    pub result_ref: String,
    #[serde(default)]
    pub payload: JsonValue,
    /// Secondary material (insights, notes) shown next to the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<JsonValue>,
}

impl GenerationOutput {
    pub fn new(result_ref: impl Into<String>) -> Self {
        Self {
            result_ref: result_ref.into(),
            payload: JsonValue::Null,
            extras: None,
        }
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_extras(mut self, extras: JsonValue) -> Self {
        self.extras = Some(extras);
        self
    }
}

/// Failure of a generation attempt, tagged where it originates.
///
/// The `Display` text is internal detail for logs; clients only ever see
/// [`ErrorCategory::user_message`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation exceeded ceiling timeout of {after:?}")]
    Timeout { after: Duration },

    #[error("upstream service error: {0}")]
    Upstream(String),

    #[error("malformed upstream output: {0}")]
    MalformedOutput(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("output failed validation: {0}")]
    DomainValidation(String),
}

impl GenerationError {
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedOutput(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn domain_validation(msg: impl Into<String>) -> Self {
        Self::DomainValidation(msg.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            GenerationError::Timeout { .. } => ErrorCategory::Timeout,
            GenerationError::Upstream(_) => ErrorCategory::Upstream,
            GenerationError::MalformedOutput(_) => ErrorCategory::Parse,
            GenerationError::Storage(_) => ErrorCategory::Storage,
            GenerationError::DomainValidation(_) => ErrorCategory::DomainValidation,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    pub fn user_message(&self) -> &'static str {
        self.category().user_message()
    }
}

/// Failure taxonomy shared by the worker and the progress channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Upstream,
    Parse,
    Storage,
    DomainValidation,
}

impl ErrorCategory {
    /// Retrying a domain-validation failure would reproduce the same output.
    pub fn is_retriable(self) -> bool {
        !matches!(self, ErrorCategory::DomainValidation)
    }

    pub fn user_message(self) -> &'static str {
        match self {
            ErrorCategory::Timeout => {
                "Creating your plan is taking longer than expected. Please try again in a few minutes."
            }
            ErrorCategory::Upstream => {
                "Our coaching engine is temporarily unavailable. Please try again shortly."
            }
            ErrorCategory::Parse => {
                "We received an incomplete plan from our coaching engine. Please try again."
            }
            ErrorCategory::Storage => "We couldn't save your plan. Please try again.",
            ErrorCategory::DomainValidation => {
                "The generated plan didn't pass our safety checks. Please adjust your details and try again."
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Upstream => "upstream",
            ErrorCategory::Parse => "parse",
            ErrorCategory::Storage => "storage",
            ErrorCategory::DomainValidation => "domain_validation",
        }
    }
}

impl core::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
