use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use coachgen_core::UserId;

use crate::app::errors::json_error;
use crate::context::UserContext;

/// Header carrying the caller's user id (authentication happens upstream).
pub const USER_ID_HEADER: &str = "x-user-id";

pub async fn user_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let user_id = extract_user(req.headers()).map_err(|message| {
        json_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
    })?;

    req.extensions_mut().insert(UserContext::new(user_id));
    Ok(next.run(req).await)
}

fn extract_user(headers: &HeaderMap) -> Result<UserId, &'static str> {
    let raw = headers
        .get(USER_ID_HEADER)
        .ok_or("missing x-user-id header")?
        .to_str()
        .map_err(|_| "x-user-id must be ASCII")?
        .trim();

    raw.parse().map_err(|_| "x-user-id must be a UUID")
}
