//! Page cache collaborator

use crate::{Page, ResourceKey};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Synchronous page store consulted before every preload.
///
/// Implementations must answer without awaiting; the coordinator decides
/// synchronously whether a key needs fetching.
pub trait Cache: Send + Sync {
    /// Check if a page is cached
    fn has(&self, key: &ResourceKey) -> bool;

    /// Get a cached page
    fn get(&self, key: &ResourceKey) -> Option<Page>;

    /// Store a page
    fn set(&self, key: ResourceKey, page: Page);
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Cached pages
    pub entries: usize,
    /// Total payload size (bytes)
    pub total_size: usize,
    /// Successful lookups
    pub hits: u64,
    /// Failed lookups
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// In-memory page cache
#[derive(Debug, Default)]
pub struct MemoryCache {
    pages: DashMap<ResourceKey, Page>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a page
    pub fn remove(&self, key: &ResourceKey) -> Option<Page> {
        self.pages.remove(key).map(|(_, page)| page)
    }

    /// Number of cached pages
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Remove every page
    pub fn clear(&self) {
        self.pages.clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.pages.len(),
            total_size: self.pages.iter().map(|entry| entry.value().len()).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Cache for MemoryCache {
    fn has(&self, key: &ResourceKey) -> bool {
        self.pages.contains_key(key)
    }

    fn get(&self, key: &ResourceKey) -> Option<Page> {
        match self.pages.get(key) {
            Some(page) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(page.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn set(&self, key: ResourceKey, page: Page) {
        self.pages.insert(key, page);
    }
}
