use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::progress::ProgressSink;
use crate::result::{GenerationError, GenerationOutput};

/// What is being generated: a kind (e.g. `workout_plan`) plus its inputs.
///
/// Set when a queue entry is created and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub kind: String,
    #[serde(default)]
    pub inputs: JsonValue,
}

impl GenerationParams {
    pub fn new(kind: impl Into<String>, inputs: JsonValue) -> Self {
        Self {
            kind: kind.into(),
            inputs,
        }
    }
}

/// The external generation function.
///
/// Implementations are expected to carry their own internal retry/backoff;
/// callers bound the whole call with a ceiling timeout that exceeds it.
/// There is no mid-flight cancellation contract: dropping the future is the
/// only way to stop a call.
#[async_trait]
pub trait Generator: Send + Sync + 'static {
    async fn generate(
        &self,
        params: &GenerationParams,
        progress: &dyn ProgressSink,
    ) -> Result<GenerationOutput, GenerationError>;
}
