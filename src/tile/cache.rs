//! Tile cache for decoded tiles.
//!
//! This module provides an LRU cache for decoded tile images, so repeated
//! requests for overlapping regions do not refetch or redecode tiles.
//!
//! # Limits
//!
//! Two independent limits bound the cache:
//! - **Item limit**: maximum number of cached tiles
//! - **Byte limit**: maximum total size of the cached pixel data
//!
//! Either may be absent. Insertion evicts least-recently-used entries until
//! both hold. A tile larger than the byte limit on its own is never cached;
//! `put` reports [`CacheCapacityError::TileTooLarge`] and the caller keeps
//! using the tile for its current request.
//!
//! # Locking
//!
//! All state sits behind one mutex. Callers fetch and decode outside of it;
//! the lock only covers lookup, insertion and eviction.

use std::sync::Arc;

use lru::LruCache;
use ndarray::Array2;
use tokio::sync::Mutex;

use crate::error::CacheCapacityError;

use super::TileKey;

/// Default maximum number of cached tiles
pub const DEFAULT_CACHE_ITEMS: usize = 10;

/// A decoded tile, `(rows, cols)`, shared between the cache and readers.
pub type CachedTile = Arc<Array2<u8>>;

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub items: usize,
    pub bytes: usize,
    pub max_items: Option<usize>,
    pub max_bytes: Option<usize>,
}

struct CacheState {
    entries: LruCache<TileKey, CachedTile>,
    current_bytes: usize,
}

impl CacheState {
    fn pop_lru(&mut self) -> bool {
        match self.entries.pop_lru() {
            Some((_, tile)) => {
                self.current_bytes = self.current_bytes.saturating_sub(tile_bytes(&tile));
                true
            }
            None => false,
        }
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

/// LRU cache for decoded tiles with item and byte limits.
///
/// # Example
///
/// ```
/// use catmaid_tiles::tile::{TileCache, TileKey};
/// use ndarray::Array2;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() {
///     let cache = TileCache::with_limits(Some(4), Some(1 << 20));
///
///     let key = TileKey::new("http://tiles/", 0, 3, 1, 2);
///     let tile = Arc::new(Array2::<u8>::zeros((256, 256)));
///
///     cache.put(key.clone(), tile.clone()).await.unwrap();
///     assert!(cache.get(&key).await.is_some());
/// }
/// ```
pub struct TileCache {
    state: Mutex<CacheState>,
    max_items: Option<usize>,
    max_bytes: Option<usize>,
}

impl TileCache {
    /// Create a cache holding up to [`DEFAULT_CACHE_ITEMS`] tiles, with no
    /// byte limit.
    pub fn new() -> Self {
        Self::with_limits(Some(DEFAULT_CACHE_ITEMS), None)
    }

    /// Create a cache with the given limits. `None` means unbounded.
    pub fn with_limits(max_items: Option<usize>, max_bytes: Option<usize>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                current_bytes: 0,
            }),
            max_items,
            max_bytes,
        }
    }

    /// Get a tile, marking it as recently used.
    pub async fn get(&self, key: &TileKey) -> Option<CachedTile> {
        let mut state = self.state.lock().await;
        state.entries.get(key).cloned()
    }

    /// Check if a tile is cached without updating LRU order.
    pub async fn contains(&self, key: &TileKey) -> bool {
        let state = self.state.lock().await;
        state.entries.contains(key)
    }

    /// Store a tile.
    ///
    /// Least-recently-used entries are evicted until both limits hold. An
    /// existing entry for `key` is replaced and marked as recently used.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the cache unchanged, if the tile alone is
    /// larger than the byte limit or the item limit is zero.
    pub async fn put(&self, key: TileKey, tile: CachedTile) -> Result<(), CacheCapacityError> {
        if self.max_items == Some(0) {
            return Err(CacheCapacityError::Disabled);
        }

        let size = tile_bytes(&tile);
        if let Some(max_bytes) = self.max_bytes {
            if size > max_bytes {
                return Err(CacheCapacityError::TileTooLarge { size, max_bytes });
            }
        }

        let mut state = self.state.lock().await;

        // Replace an existing entry in place
        if let Some(old) = state.entries.pop(&key) {
            state.current_bytes = state.current_bytes.saturating_sub(tile_bytes(&old));
        }

        if let Some(max_items) = self.max_items {
            while state.entries.len() >= max_items && state.pop_lru() {}
        }
        if let Some(max_bytes) = self.max_bytes {
            while state.current_bytes + size > max_bytes && state.pop_lru() {}
        }

        state.entries.put(key, tile);
        state.current_bytes += size;
        Ok(())
    }

    /// Remove a tile, returning it if it was cached.
    pub async fn remove(&self, key: &TileKey) -> Option<CachedTile> {
        let mut state = self.state.lock().await;
        let tile = state.entries.pop(key)?;
        state.current_bytes = state.current_bytes.saturating_sub(tile_bytes(&tile));
        Some(tile)
    }

    /// Clear all entries.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.current_bytes = 0;
    }

    /// Get the current number of cached tiles.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Check if the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }

    /// Get the current total size of cached pixel data in bytes.
    pub async fn size(&self) -> usize {
        self.state.lock().await.current_bytes
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            items: state.entries.len(),
            bytes: state.current_bytes,
            max_items: self.max_items,
            max_bytes: self.max_bytes,
        }
    }

    pub fn max_items(&self) -> Option<usize> {
        self.max_items
    }

    pub fn max_bytes(&self) -> Option<usize> {
        self.max_bytes
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte size of a decoded tile.
fn tile_bytes(tile: &Array2<u8>) -> usize {
    tile.len()
}

// =============================================================================
// Tests
// =============================================================================
