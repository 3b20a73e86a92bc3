//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: queue store, generator and orchestrator wiring
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use coachgen_infra::Orchestrator;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> anyhow::Result<Router> {
    let orchestrator = services::build_orchestrator(config).await?;
    Ok(build_router(orchestrator))
}

/// Router over an already wired orchestrator.
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    // Identity is resolved before the orchestrator is made available.
    let protected = routes::router().layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn(middleware::user_middleware))
            .layer(Extension(orchestrator)),
    );

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}
