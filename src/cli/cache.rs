//! `crewclause cache` command handler.

use anyhow::{Context, Result};

use crewclause::cache::create_cache;
use crewclause::config::{CacheBackend, Config};

use super::CacheAction;

/// Handle `crewclause cache` subcommands.
pub(crate) async fn cmd_cache(config: Config, action: CacheAction) -> Result<()> {
    match action {
        CacheAction::Stats => {
            let Some(handle) = create_cache(&config) else {
                println!("Response cache is disabled.");
                return Ok(());
            };
            let stats = handle
                .cache
                .stats()
                .await
                .context("Failed to read cache stats")?;

            println!("{:<10} {}", "Backend", handle.cache.backend());
            if config.cache.backend == CacheBackend::File {
                println!("{:<10} {}", "Path", config.cache_path().display());
            }
            println!("{:<10} {}", "Entries", stats.entries);
            println!("{:<10} {}", "Hits", stats.hits);
        }
    }

    Ok(())
}
