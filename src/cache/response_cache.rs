//! Answer cache in front of the upstream model.
//!
//! Lookups are keyed by [`CompositeKey`] fingerprint. A hit schedules a
//! best-effort counter bump and returns immediately. Stores are
//! insert-or-ignore: the first answer computed for a normalized key is the
//! one every later lookup sees. There is no TTL and nothing is evicted.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::key::CompositeKey;
use super::store::{CacheEntry, CacheStats, CacheStore, InsertOutcome};
use crate::error::{CrewError, Result};
use crate::utils::BestEffort;

/// Lookup/store front over an injected [`CacheStore`].
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    background: BestEffort,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("pending", &self.background.pending())
            .finish()
    }
}

impl ResponseCache {
    /// Build a cache over `store`. Hit bookkeeping runs on `background`.
    pub fn new(store: Arc<dyn CacheStore>, background: BestEffort) -> Self {
        Self { store, background }
    }

    /// Backend name of the underlying store.
    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Look up a cached answer.
    ///
    /// `Ok(None)` means the key is absent. A backing-store fault comes back as
    /// [`CrewError::CacheLookup`] so the caller can tell it apart from a miss.
    /// On a hit the access counter is bumped in the background; a failure
    /// there is logged and never reaches this call.
    pub async fn lookup(&self, key: &CompositeKey) -> Result<Option<String>> {
        let entry = self.store.find(key).await.map_err(into_lookup_error)?;
        let Some(entry) = entry else {
            debug!(key = %key, "Cache miss");
            return Ok(None);
        };

        debug!(key = %key, hits = entry.access_count, "Cache hit");
        let store = Arc::clone(&self.store);
        let fingerprint = entry.fingerprint;
        self.background.spawn("cache.touch", async move {
            store.touch(&fingerprint, Utc::now()).await
        });
        Ok(Some(entry.value))
    }

    /// Insert an answer for `key` unless one already exists.
    ///
    /// A backing-store fault comes back as [`CrewError::CacheStore`].
    pub async fn store(&self, key: &CompositeKey, value: String) -> Result<InsertOutcome> {
        let outcome = self
            .store
            .insert(CacheEntry::new(key, value))
            .await
            .map_err(into_store_error)?;
        match outcome {
            InsertOutcome::Inserted => debug!(key = %key, "Cached answer"),
            InsertOutcome::AlreadyPresent => {
                debug!(key = %key, "Answer already cached, keeping first writer")
            }
        }
        Ok(outcome)
    }

    /// [`ResponseCache::store`] as a detached best-effort task.
    pub fn store_detached(&self, key: CompositeKey, value: String) {
        let cache = self.clone();
        self.background.spawn("cache.store", async move {
            cache.store(&key, value).await.map(|_| ())
        });
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        self.store.stats().await.map_err(into_lookup_error)
    }

    /// Wait for pending bookkeeping and detached stores.
    pub async fn settle(&self) {
        self.background.drain().await;
    }
}

fn into_lookup_error(e: CrewError) -> CrewError {
    match e {
        CrewError::CacheLookup(_) => e,
        other => CrewError::CacheLookup(other.to_string()),
    }
}

fn into_store_error(e: CrewError) -> CrewError {
    match e {
        CrewError::CacheStore(_) => e,
        other => CrewError::CacheStore(other.to_string()),
    }
}
