//! Generation requests: streaming creation and status polling.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Extension, Path},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio_stream::{StreamExt, wrappers::UnboundedReceiverStream};

use coachgen_core::RequestId;
use coachgen_infra::{Orchestrator, ProgressEvent};

use crate::app::dto::CreateGenerationRequest;
use crate::app::errors::{json_error, orchestrator_error_to_response};
use crate::context::UserContext;

pub const NDJSON: &str = "application/x-ndjson";

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /generations
///
/// Streams newline-delimited progress events until a terminal `complete`
/// or `error` line. Reconnecting with the same `requestId` replays or
/// re-attaches instead of starting new work.
pub async fn create(
    Extension(orchestrator): Extension<Arc<Orchestrator>>,
    Extension(user): Extension<UserContext>,
    Json(body): Json<CreateGenerationRequest>,
) -> Response {
    let request_id = match RequestId::parse(&body.request_id) {
        Ok(id) => id,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, "invalid_request_id", e.to_string()),
    };
    if body.kind.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "invalid_kind", "kind must not be empty");
    }

    let rx = match orchestrator
        .open_stream(request_id, user.user_id(), body.params())
        .await
    {
        Ok(rx) => rx,
        Err(e) => return orchestrator_error_to_response(e),
    };

    let lines =
        UnboundedReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(ndjson_line(&event)));

    (
        [
            (header::CONTENT_TYPE, NDJSON),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(lines),
    )
        .into_response()
}

/// GET /generations/:request_id
///
/// Current queue entry for a request owned by the caller.
pub async fn status(
    Extension(orchestrator): Extension<Arc<Orchestrator>>,
    Extension(user): Extension<UserContext>,
    Path(request_id): Path<String>,
) -> Response {
    let request_id = match RequestId::parse(&request_id) {
        Ok(id) => id,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, "invalid_request_id", e.to_string()),
    };

    match orchestrator.get_status(&request_id, user.user_id()).await {
        Ok(entry) => Json(entry).into_response(),
        Err(e) => orchestrator_error_to_response(e),
    }
}

fn ndjson_line(event: &ProgressEvent) -> String {
    match serde_json::to_string(event) {
        Ok(mut line) => {
            line.push('\n');
            line
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to encode progress event");
            concat!(
                r#"{"phase":"error","progress":0,"#,
                r#""message":"Something went wrong.","error":"Something went wrong."}"#,
                "\n"
            )
            .to_string()
        }
    }
}
