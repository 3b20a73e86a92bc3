//! Stand-in generator for development and tests.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::generator::{GenerationParams, Generator};
use crate::progress::{ProgressSink, ProgressUpdate};
use crate::result::{GenerationError, GenerationOutput};

/// Sleeps for a fixed duration while reporting a few milestones, then returns
/// a freshly minted artifact reference.
#[derive(Debug, Clone)]
pub struct SimulatedGenerator {
    duration: Duration,
}

impl SimulatedGenerator {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Generator for SimulatedGenerator {
    async fn generate(
        &self,
        params: &GenerationParams,
        progress: &dyn ProgressSink,
    ) -> Result<GenerationOutput, GenerationError> {
        if params.kind.trim().is_empty() {
            return Err(GenerationError::domain_validation("empty generation kind"));
        }

        let slice = self.duration / 3;
        progress.report(ProgressUpdate::new("analyzing", 10, "Reviewing your goals"));
        tokio::time::sleep(slice).await;
        progress.report(ProgressUpdate::new("generating", 40, "Drafting your plan"));
        tokio::time::sleep(slice).await;
        progress.report(ProgressUpdate::new("validating", 80, "Checking the plan"));
        tokio::time::sleep(self.duration.saturating_sub(slice * 2)).await;

        let result_ref = format!("{}-{}", params.kind, Uuid::now_v7());
        Ok(GenerationOutput::new(result_ref).with_payload(json!({
            "kind": params.kind,
            "inputs": params.inputs,
        })))
    }
}
