//! API authentication middleware.
//!
//! When a static API token is configured, every request except the health
//! probe must carry `Authorization: Bearer <token>`. Without a configured
//! token the middleware is a pass-through (the front end's own auth sits in
//! front of this service).

use std::sync::Arc;

use axum::{
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use super::error::error_response;
use super::server::AppState;

/// Middleware that checks for `Authorization: Bearer <token>`.
///
/// Skips auth for `GET /api/health` and CORS preflight requests.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.api_token.as_deref() else {
        return next.run(request).await;
    };

    let path = request.uri().path();
    if path == "/api/health" || request.method() == axum::http::Method::OPTIONS {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match presented {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => {
            next.run(request).await
        }
        _ => error_response(StatusCode::UNAUTHORIZED, "unauthorized"),
    }
}

// ============================================================================
// Tests
// ============================================================================
