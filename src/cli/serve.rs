//! `crewclause serve` command.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crewclause::api::{start_server, AppState};
use crewclause::config::Config;

/// Run the API server until Ctrl-C, then flush the cache.
pub(crate) async fn cmd_serve(
    mut config: Config,
    bind: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let (assistant, handle) = super::build_assistant(&config)?;
    info!(
        model = %config.provider.model,
        cache = handle.as_ref().map(|h| h.cache.backend()).unwrap_or("disabled"),
        "Starting CrewClause"
    );

    let state = AppState::new(Arc::new(assistant)).with_api_token(config.server.api_token.clone());
    let served = start_server(&config.server, state)
        .await
        .context("API server failed");

    if let Some(handle) = handle {
        handle.shutdown().await;
    }
    served
}
