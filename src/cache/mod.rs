//! Answer cache: composite keys, backing stores, and the lookup/store front.

pub mod factory;
pub mod key;
pub mod response_cache;
pub mod store;

pub use factory::{create_cache, CacheHandle};
pub use key::{normalize_query, CacheContext, CompositeKey};
pub use response_cache::ResponseCache;
pub use store::{CacheEntry, CacheStats, CacheStore, InsertOutcome, JsonFileStore, MemoryStore};
