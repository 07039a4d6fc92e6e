//! Cache effectiveness integration tests.
//!
//! Tests verify:
//! - Repeated ROIs are served from the tile cache
//! - Item and byte limits hold while volumes are fetched
//! - Tiles too large for the cache are still delivered
//! - A cache can be shared between fetchers of one stack

use std::sync::Arc;

use catmaid_tiles::tile::{Roi, TileCache};

use super::test_utils::{fetcher, key, quick_config, tile_url, MockTileSource, BASE, TILE};

const TILE_BYTES: usize = (TILE * TILE) as usize;

fn five_slices() -> Roi {
    Roi::new([10.0, 200.0, 400.0], [15.0, 250.0, 450.0])
}

#[tokio::test]
async fn test_repeated_roi_hits_cache() {
    let (f, source) = fetcher(MockTileSource::new(), quick_config());

    let first = f.fetch_stack_space(&five_slices(), 0).await.unwrap();
    assert_eq!(first.stats.cache_hits, 0);
    assert_eq!(source.request_count(), 5);

    let second = f.fetch_stack_space(&five_slices(), 0).await.unwrap();
    assert_eq!(second.stats.cache_hits, 5);
    assert_eq!(second.stats.fetched, 0);
    assert_eq!(source.request_count(), 5);
    assert_eq!(first.volume, second.volume);
}

#[tokio::test]
async fn test_overlapping_roi_reuses_tiles() {
    let (f, source) = fetcher(MockTileSource::new(), quick_config());

    f.fetch_stack_space(&five_slices(), 0).await.unwrap();
    source.reset_tracking();

    // same tiles, different crop
    let inner = Roi::new([11.0, 210.0, 300.0], [13.0, 230.0, 500.0]);
    let response = f.fetch_stack_space(&inner, 0).await.unwrap();

    assert_eq!(response.stats.cache_hits, 2);
    assert_eq!(source.request_count(), 0);
}

#[tokio::test]
async fn test_item_limit_evicts_oldest() {
    let config = quick_config().with_cache_limits(Some(3), None);
    let (f, source) = fetcher(MockTileSource::new(), config);

    f.fetch_stack_space(&five_slices(), 0).await.unwrap();

    let stats = f.cache_stats().await;
    assert_eq!(stats.items, 3);
    assert_eq!(stats.bytes, 3 * TILE_BYTES);

    // slices 12..15 are the most recent
    assert!(!f.cache().contains(&key(0, 10, 0, 1)).await);
    assert!(!f.cache().contains(&key(0, 11, 0, 1)).await);
    assert!(f.cache().contains(&key(0, 14, 0, 1)).await);

    source.reset_tracking();
    f.fetch_stack_space(&five_slices(), 0).await.unwrap();
    assert_eq!(source.request_count(), 5);
}

#[tokio::test]
async fn test_byte_limit_holds() {
    let config = quick_config().with_cache_limits(None, Some(2 * TILE_BYTES + 1));
    let (f, _) = fetcher(MockTileSource::new(), config);

    f.fetch_stack_space(&five_slices(), 0).await.unwrap();

    let stats = f.cache_stats().await;
    assert_eq!(stats.items, 2);
    assert!(stats.bytes <= 2 * TILE_BYTES + 1);
}

#[tokio::test]
async fn test_oversized_tiles_bypass_cache() {
    let config = quick_config().with_cache_limits(Some(100), Some(TILE_BYTES - 1));
    let (f, source) = fetcher(MockTileSource::new(), config);

    let first = f.fetch_stack_space(&five_slices(), 0).await.unwrap();
    let second = f.fetch_stack_space(&five_slices(), 0).await.unwrap();

    assert_eq!(first.volume, second.volume);
    assert_eq!(f.cache_stats().await.items, 0);
    assert_eq!(source.request_count(), 10);
}

#[tokio::test]
async fn test_disabled_cache() {
    let config = quick_config().with_cache_limits(Some(0), None);
    let (f, source) = fetcher(MockTileSource::new(), config);

    f.fetch_stack_space(&five_slices(), 0).await.unwrap();
    f.fetch_stack_space(&five_slices(), 0).await.unwrap();

    assert!(f.cache().is_empty().await);
    assert_eq!(source.request_count(), 10);
}

#[tokio::test]
async fn test_clear_cache_forces_refetch() {
    let (f, source) = fetcher(MockTileSource::new(), quick_config());

    f.fetch_stack_space(&five_slices(), 0).await.unwrap();
    f.clear_cache().await;
    assert_eq!(f.cache_stats().await.bytes, 0);

    f.fetch_stack_space(&five_slices(), 0).await.unwrap();
    assert_eq!(source.request_count(), 10);
    assert_eq!(source.requests_for(&tile_url(BASE, 10, 0, 1, 0)).await, 2);
}

#[tokio::test]
async fn test_shared_cache_between_fetchers() {
    let cache = Arc::new(TileCache::with_limits(Some(100), None));

    let (a, source_a) = fetcher(MockTileSource::new(), quick_config());
    let a = a.with_cache(Arc::clone(&cache));
    let (b, source_b) = fetcher(MockTileSource::new(), quick_config());
    let b = b.with_cache(Arc::clone(&cache));

    a.fetch_stack_space(&five_slices(), 0).await.unwrap();
    let response = b.fetch_stack_space(&five_slices(), 0).await.unwrap();

    assert_eq!(source_a.request_count(), 5);
    assert_eq!(source_b.request_count(), 0);
    assert_eq!(response.stats.cache_hits, 5);
}

#[tokio::test]
async fn test_zoom_levels_cached_separately() {
    let (f, source) = fetcher(MockTileSource::new(), quick_config());
    let roi = Roi::new([0.0, 0.0, 0.0], [1.0, 100.0, 100.0]);

    f.fetch_scaled_space(&roi, 0).await.unwrap();
    f.fetch_scaled_space(&roi, 1).await.unwrap();

    assert_eq!(source.request_count(), 2);
    assert!(f.cache().contains(&key(0, 0, 0, 0)).await);
    assert!(f.cache().contains(&key(1, 0, 0, 0)).await);
}
