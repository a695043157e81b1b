//! Liveness probe for load balancers and the front end.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Cache backend in use, or `"disabled"`.
    pub cache: &'static str,
}

/// GET /api/health. Never touches the upstream model or the cache store.
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        cache: state
            .assistant
            .cache()
            .map(|c| c.backend())
            .unwrap_or("disabled"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::test_support::{scripted_state, scripted_state_with_cache, Script};

    #[tokio::test]
    async fn test_health_reports_version_and_cache_backend() {
        let (state, _store) = scripted_state_with_cache(Script::Answer("a"));
        let Json(body) = get_health(State(Arc::new(state))).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(body.cache, "memory");
    }

    #[tokio::test]
    async fn test_health_without_cache() {
        let Json(body) = get_health(State(Arc::new(scripted_state(Script::Answer("a"))))).await;
        assert_eq!(body.cache, "disabled");
    }
}
