//! Store-wide constants and the small amount of runtime configuration.

use crate::upsert::UpsertStrategy;

/// Ids per lookup chunk and rows per cursor fetch. Bounds both the size of a
/// single lookup and the work done by one query step.
pub const ID_BATCH: usize = 1000;

/// Recursion bound for relation box expansion and relation-parent discovery.
/// Deeper (or cyclic) nesting is reported as incomplete rather than failing.
pub const MAX_RELATION_DEPTH: usize = 10;

/// Entries held by a session's username cache before it is cleared.
pub const USERNAME_CACHE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub upsert: UpsertStrategy,
    /// Worker threads used by `QueryPool`.
    pub query_workers: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            upsert: UpsertStrategy::Native,
            query_workers: std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1).max(1))
                .unwrap_or(1),
        }
    }
}

impl StoreConfig {
    pub fn with_upsert(mut self, upsert: UpsertStrategy) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn with_query_workers(mut self, n: usize) -> Self {
        self.query_workers = n.max(1);
        self
    }
}
