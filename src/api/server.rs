//! Axum API server for CrewClause.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware as axum_mw;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::config::{ServerConfig, DEFAULT_BODY_LIMIT};
use crate::assistant::ContractAssistant;
use crate::error::{CrewError, Result};

/// Shared state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    /// The completion request handler.
    pub assistant: Arc<ContractAssistant>,
    /// Static API token accepted on protected endpoints. `None` disables auth.
    pub api_token: Option<String>,
    /// Parent of every per-request cancellation token. Cancelled on shutdown
    /// so in-flight retry loops stop at their next await point.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(assistant: Arc<ContractAssistant>) -> Self {
        Self {
            assistant,
            api_token: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_api_token(mut self, token: Option<String>) -> Self {
        self.api_token = token.filter(|t| !t.is_empty());
        self
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: AppState, config: &ServerConfig) -> Result<Router> {
    let shared_state = Arc::new(state);

    let body_limit = if config.body_limit == 0 {
        DEFAULT_BODY_LIMIT
    } else {
        config.body_limit
    };

    let mut api = Router::new()
        .route("/api/health", get(super::routes::health::get_health))
        .route("/api/chat", post(super::routes::chat::post_chat))
        .route("/api/cache/stats", get(super::routes::cache::get_stats))
        // Body size limit applied before auth so oversized payloads are
        // rejected before any token validation.
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum_mw::from_fn_with_state(
            shared_state.clone(),
            super::middleware::auth_middleware,
        ));

    if let Some(origin) = &config.allowed_origin {
        let origin = origin
            .parse::<HeaderValue>()
            .map_err(|e| CrewError::Config(format!("invalid server.allowed_origin: {e}")))?;
        let cors = CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([
                HeaderName::from_static("content-type"),
                HeaderName::from_static("authorization"),
            ]);
        api = api.layer(cors);
    }

    Ok(api.layer(TraceLayer::new_for_http()).with_state(shared_state))
}

/// Start the API server and run until Ctrl-C.
///
/// On shutdown, in-flight requests are cancelled, then pending best-effort
/// cache work is drained.
pub async fn start_server(config: &ServerConfig, state: AppState) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let assistant = Arc::clone(&state.assistant);
    let app = build_router(state, config)?;

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("CrewClause API server listening on {addr}");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(cache) = assistant.cache() {
        cache.settle().await;
    }
    info!("API server stopped");
    Ok(())
}
