use axum::{
    Router,
    routing::{get, post},
};

pub mod generations;
pub mod system;

/// Router for all user-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/generations", post(generations::create))
        .route("/generations/:request_id", get(generations::status))
}
