//! Factory for the configured answer cache.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{CacheBackend, Config};
use crate::utils::BestEffort;

use super::response_cache::ResponseCache;
use super::store::{CacheStore, JsonFileStore, MemoryStore};

/// The configured cache plus what is needed to shut it down cleanly.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    pub cache: ResponseCache,
    file_store: Option<Arc<JsonFileStore>>,
}

impl CacheHandle {
    /// Drain pending best-effort work, then flush the file store if there is one.
    pub async fn shutdown(&self) {
        self.cache.settle().await;
        if let Some(store) = &self.file_store {
            if let Err(e) = store.flush() {
                warn!(path = %store.path().display(), error = %e, "Failed to flush response cache");
            }
        }
    }
}

/// Create the cache described by `config.cache`, or `None` when disabled.
pub fn create_cache(config: &Config) -> Option<CacheHandle> {
    if !config.cache.enabled {
        info!("Response cache disabled");
        return None;
    }

    let background = BestEffort::new();
    let handle = match config.cache.backend {
        CacheBackend::Memory => {
            let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
            CacheHandle {
                cache: ResponseCache::new(store, background),
                file_store: None,
            }
        }
        CacheBackend::File => {
            let file = Arc::new(JsonFileStore::open(config.cache_path()));
            info!(path = %file.path().display(), "Response cache opened");
            CacheHandle {
                cache: ResponseCache::new(file.clone(), background),
                file_store: Some(file),
            }
        }
    };
    Some(handle)
}
