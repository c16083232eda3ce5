use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::AppState;

/// Paths answered while startup is still running.
const ALWAYS_OPEN: &[&str] = &["/health"];

/// Rejects requests with `503 Service Unavailable` until startup has finished.
pub async fn readiness_gate(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    if ALWAYS_OPEN.contains(&req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let ready = req
        .extensions()
        .get::<Arc<AppState>>()
        .is_some_and(|state| state.is_ready());

    if !ready {
        tracing::debug!(path = %req.uri().path(), "request rejected before startup completed");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(next.run(req).await)
}
