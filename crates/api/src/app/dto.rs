use serde::Deserialize;
use serde_json::Value as JsonValue;

use coachgen_ai::GenerationParams;

/// Body of `POST /generations`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGenerationRequest {
    pub request_id: String,
    pub kind: String,
    #[serde(default)]
    pub inputs: JsonValue,
}

impl CreateGenerationRequest {
    pub fn params(&self) -> GenerationParams {
        GenerationParams::new(self.kind.trim(), self.inputs.clone())
    }
}
