//! Tile layer: planning, caching, decoding and volume assembly.
//!
//! # Architecture
//!
//! The image fetcher sits between callers and the tile source:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Caller (ROI, zoom)             │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │             ImageFetcher                │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  plan_tiles  │  │   TileCache     │  │
//! │  │  (ROI →      │  │   (decoded      │  │
//! │  │   tiles)     │  │    tiles, LRU)  │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │       TileSource → TileDecoder          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`ImageFetcher`]: Main entry point for volume requests
//! - [`plan_tiles`]: Computes the tiles covering an ROI and where each lands
//! - [`TileCache`]: LRU cache for decoded tiles with item and byte limits
//! - [`TileKey`]: Identifies a tile (mirror, zoom, depth, row, column)
//! - [`TileDecoder`]: Decodes JPEG/PNG tiles to greyscale arrays
//!
//! # Example
//!
//! ```
//! use catmaid_tiles::tile::{TileCache, TileKey};
//! use ndarray::Array2;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Cache at most 100 tiles or 16MB of pixels
//!     let cache = TileCache::with_limits(Some(100), Some(16 * 1024 * 1024));
//!
//!     let key = TileKey::new("https://tiles.example.org/stack/", 0, 12, 3, 4);
//!
//!     if cache.get(&key).await.is_none() {
//!         let tile = Arc::new(Array2::<u8>::zeros((256, 256)));
//!         cache.put(key, tile).await.unwrap();
//!     }
//! }
//! ```

mod cache;
mod decoder;
mod fetcher;
mod index;

pub use cache::{CacheStats, CachedTile, TileCache, DEFAULT_CACHE_ITEMS};
pub use decoder::TileDecoder;
pub use fetcher::{
    FetchOutcome, FetchStats, ImageFetcher, MirrorSelector, Roi, RoiMode, SinkReport,
    VolumeResponse,
};
pub use index::{plan_tiles, ScaledRoi, TileKey, TilePlacement, TilePlan};
