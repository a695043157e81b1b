//! Cache statistics route.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::api::error::error_response;
use crate::api::server::AppState;

/// GET /api/cache/stats: entry and hit counts of the answer cache.
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Response {
    let Some(cache) = state.assistant.cache() else {
        return Json(json!({ "enabled": false })).into_response();
    };

    match cache.stats().await {
        Ok(stats) => Json(json!({
            "enabled": true,
            "backend": cache.backend(),
            "entries": stats.entries,
            "hits": stats.hits,
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Cache stats unavailable");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "cache stats unavailable")
        }
    }
}
