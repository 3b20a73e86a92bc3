use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use coachgen_infra::{OrchestratorError, QueueStoreError};

pub fn orchestrator_error_to_response(err: OrchestratorError) -> axum::response::Response {
    match err {
        OrchestratorError::Forbidden(id) => json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            format!("request {id} belongs to another user"),
        ),
        OrchestratorError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("request {id} not found"))
        }
        OrchestratorError::Store(QueueStoreError::NotFound(id)) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("request {id} not found"))
        }
        OrchestratorError::Store(e) => {
            tracing::error!(error = %e, "queue store failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_error",
                "the generation queue is unavailable; please retry shortly",
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
