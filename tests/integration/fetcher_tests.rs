//! End-to-end volume fetch tests.
//!
//! Tests verify:
//! - Volume shape and content for ROIs in stack, scaled and project space
//! - Broken slices, 404 tiles and best-effort gaps are filled
//! - Retries, timeouts and error propagation
//! - Worker-pool fetches match sequential ones
//! - Output orientation and memory-mapped sinks
//! - Mirror selection

use std::time::Duration;

use catmaid_tiles::error::{IoError, TileFailure, VolumeError};
use catmaid_tiles::stack::{Point3, Stack};
use catmaid_tiles::tile::{FetchOutcome, ImageFetcher, MirrorSelector, Roi, RoiMode};
use catmaid_tiles::volume::{AxisOrder, MmapVolume};
use ndarray::Array3;

use super::test_utils::{
    fetcher, fetcher_for, key, mirror, quick_config, test_project_stack, test_stack, tile_url,
    voxel, MockTileSource, BASE,
};

/// Assert that a `zyx` volume holds the voxels starting at scaled `origin`.
fn assert_voxels(volume: &Array3<u8>, origin: [i64; 3]) {
    let [z0, y0, x0] = origin;
    for ((z, y, x), &value) in volume.indexed_iter() {
        let expected = voxel(x0 + x as i64, y0 + y as i64, z0 + z as i64);
        assert_eq!(
            value, expected,
            "voxel mismatch at (z={}, y={}, x={})",
            z, y, x
        );
    }
}

// =============================================================================
// Shape and Content
// =============================================================================

#[tokio::test]
async fn test_stack_roi_within_one_tile_column() {
    let (f, source) = fetcher(MockTileSource::new(), quick_config());
    let roi = Roi::new([10.0, 200.0, 400.0], [15.0, 250.0, 450.0]);

    let response = f.fetch_stack_space(&roi, 0).await.unwrap();

    assert_eq!(response.volume.dim(), (5, 50, 50));
    assert_voxels(&response.volume, [10, 200, 400]);
    assert!(response.outcome.is_complete());
    assert_eq!(response.stats.tiles, 5);
    assert_eq!(response.stats.fetched, 5);

    // one tile per slice, all in row 0, column 1
    assert_eq!(source.request_count(), 5);
    for z in 10..15 {
        assert_eq!(source.requests_for(&tile_url(BASE, z, 0, 1, 0)).await, 1);
    }
}

#[tokio::test]
async fn test_roi_spanning_tile_corners() {
    let (f, source) = fetcher(MockTileSource::new(), quick_config());
    let roi = Roi::new([0.0, 250.0, 250.0], [2.0, 262.0, 262.0]);

    let response = f.fetch_stack_space(&roi, 0).await.unwrap();

    assert_eq!(response.volume.dim(), (2, 12, 12));
    assert_voxels(&response.volume, [0, 250, 250]);
    assert_eq!(source.request_count(), 8);
}

#[tokio::test]
async fn test_negative_coordinates() {
    let (f, source) = fetcher(MockTileSource::new(), quick_config());
    let roi = Roi::new([0.0, -10.0, -10.0], [1.0, 10.0, 10.0]);

    let response = f.fetch_stack_space(&roi, 0).await.unwrap();

    assert_eq!(response.volume.dim(), (1, 20, 20));
    assert_voxels(&response.volume, [0, -10, -10]);
    assert_eq!(source.request_count(), 4);
    assert_eq!(source.requests_for(&tile_url(BASE, 0, -1, -1, 0)).await, 1);
}

#[tokio::test]
async fn test_zoomed_stack_roi() {
    let (f, source) = fetcher(MockTileSource::new(), quick_config());
    // stack pixels 512..1024 are scaled pixels 256..512 at zoom 1
    let roi = Roi::new([3.0, 512.0, 512.0], [4.0, 1024.0, 1024.0]);

    let response = f.fetch_stack_space(&roi, 1).await.unwrap();

    assert_eq!(response.volume.dim(), (1, 256, 256));
    assert_voxels(&response.volume, [3, 256, 256]);
    assert_eq!(source.get_requests().await, vec![tile_url(BASE, 3, 1, 1, 1)]);
}

#[tokio::test]
async fn test_scaled_roi_is_not_rescaled() {
    let (f, _) = fetcher(MockTileSource::new(), quick_config());
    let roi = Roi::new([0.0, 100.0, 100.0], [1.0, 120.0, 130.0]);

    let response = f.fetch_scaled_space(&roi, 1).await.unwrap();

    assert_eq!(response.volume.dim(), (1, 20, 30));
    assert_voxels(&response.volume, [0, 100, 100]);
}

#[tokio::test]
async fn test_project_roi_matches_stack_roi() {
    let source = std::sync::Arc::new(MockTileSource::new());
    let f = ImageFetcher::from_project_stack(test_project_stack(), source, quick_config()).unwrap();

    // translation (100, 200, 0), resolution (4, 4, 40); zyx order
    let project = Roi::new([400.0, 1000.0, 1700.0], [600.0, 1200.0, 1900.0]);
    let stack = Roi::new([10.0, 200.0, 400.0], [15.0, 250.0, 450.0]);

    let from_project = f.fetch_project_space(&project, 0).await.unwrap();
    let from_stack = f.fetch_stack_space(&stack, 0).await.unwrap();

    assert_eq!(from_project.volume.dim(), (5, 50, 50));
    assert_eq!(from_project.volume, from_stack.volume);
}

#[tokio::test]
async fn test_project_roi_without_transform() {
    let (f, source) = fetcher(MockTileSource::new(), quick_config());
    let roi = Roi::new([0.0; 3], [1.0; 3]);

    let result = f.fetch_project_space(&roi, 0).await;

    assert!(matches!(result, Err(VolumeError::Configuration(_))));
    assert_eq!(source.request_count(), 0);
}

// =============================================================================
// Orientation
// =============================================================================

#[tokio::test]
async fn test_xyz_orientation() {
    let config = quick_config().with_output_orientation(AxisOrder::XYZ);
    let (f, _) = fetcher(MockTileSource::new(), config);
    // ROI given in xyz order too
    let roi = Roi::new([400.0, 200.0, 10.0], [450.0, 250.0, 13.0]);

    let response = f.fetch_stack_space(&roi, 0).await.unwrap();

    assert_eq!(response.volume.dim(), (50, 50, 3));
    for ((x, y, z), &value) in response.volume.indexed_iter() {
        assert_eq!(value, voxel(400 + x as i64, 200 + y as i64, 10 + z as i64));
    }
}

#[tokio::test]
async fn test_fetch_into_mmap_volume() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("volume.raw");

    let config = quick_config()
        .with_output_orientation(AxisOrder::XYZ)
        .with_fill_value(9);
    let (f, _) = fetcher(MockTileSource::new(), config);
    let roi = Roi::new([250.0, 250.0, 0.0], [270.0, 262.0, 2.0]);

    let shape = f.output_shape(&roi, RoiMode::Stack, 0).unwrap();
    assert_eq!(shape, [20, 12, 2]);

    let mut volume = MmapVolume::create(&path, shape, f.config().fill_value).unwrap();
    let report = f
        .fetch_into(&roi, RoiMode::Stack, 0, &mut volume)
        .await
        .unwrap();
    volume.flush().unwrap();
    assert!(report.outcome.is_complete());
    assert_eq!(report.stats.tiles, 8);

    let in_memory = f.fetch_stack_space(&roi, 0).await.unwrap();
    assert_eq!(volume.view().unwrap(), in_memory.volume);

    drop(volume);
    let reopened = MmapVolume::open(&path, shape).unwrap();
    assert_eq!(reopened.view().unwrap(), in_memory.volume);
}

#[tokio::test]
async fn test_fetch_into_array() {
    let (f, _) = fetcher(MockTileSource::new(), quick_config());
    let roi = Roi::new([1.0, 500.0, 500.0], [3.0, 520.0, 530.0]);

    let mut out = Array3::<u8>::zeros((2, 20, 30));
    f.fetch_into(&roi, RoiMode::Stack, 0, &mut out)
        .await
        .unwrap();

    assert_voxels(&out, [1, 500, 500]);
}

// =============================================================================
// Filling
// =============================================================================

#[tokio::test]
async fn test_broken_slice_is_filled_without_request() {
    let stack = test_stack().with_broken_slices([12]);
    let config = quick_config().with_fill_value(200);
    let (f, source) = fetcher_for(stack, MockTileSource::new(), config);
    let roi = Roi::new([10.0, 200.0, 400.0], [15.0, 250.0, 450.0]);

    let response = f.fetch_stack_space(&roi, 0).await.unwrap();

    let broken = response.volume.index_axis(ndarray::Axis(0), 2);
    assert!(broken.iter().all(|&v| v == 200));
    assert_eq!(response.volume[[0, 0, 0]], voxel(400, 200, 10));
    assert_eq!(response.volume[[4, 49, 49]], voxel(449, 249, 14));

    assert_eq!(source.request_count(), 4);
    assert_eq!(source.requests_for(&tile_url(BASE, 12, 0, 1, 0)).await, 0);
    assert_eq!(response.stats.filled, 1);
}

#[tokio::test]
async fn test_missing_tile_is_filled_and_not_cached() {
    let missing = tile_url(BASE, 0, 0, 0, 0);
    let source = MockTileSource::new().with_missing(missing.clone());
    let (f, source) = fetcher(source, quick_config().with_fill_value(5));
    let roi = Roi::new([0.0, 250.0, 250.0], [1.0, 262.0, 262.0]);

    let response = f.fetch_stack_space(&roi, 0).await.unwrap();

    // top-left 6x6 block came from the missing tile
    assert!(response.volume.iter().take(6).all(|&v| v == 5));
    assert_eq!(response.volume[[0, 11, 11]], voxel(261, 261, 0));
    assert!(response.outcome.is_complete());
    assert_eq!(response.stats.filled, 1);

    // no retries, and asked again on the next fetch
    assert_eq!(source.requests_for(&missing).await, 1);
    f.fetch_stack_space(&roi, 0).await.unwrap();
    assert_eq!(source.requests_for(&missing).await, 2);
}

#[tokio::test]
async fn test_missing_tile_fails_when_not_filling() {
    let missing = tile_url(BASE, 0, 0, 0, 0);
    let source = MockTileSource::new().with_missing(missing.clone());
    let config = quick_config().with_fill_not_found(false);
    let (f, _) = fetcher(source, config);
    let roi = Roi::new([0.0, 0.0, 0.0], [1.0, 10.0, 10.0]);

    match f.fetch_stack_space(&roi, 0).await {
        Err(VolumeError::TileFetch(e)) => {
            assert_eq!(e.key, key(0, 0, 0, 0));
            assert!(matches!(e.source, TileFailure::Io(IoError::NotFound(_))));
        }
        other => panic!("expected a tile fetch error, got {:?}", other.map(|r| r.stats)),
    }
}

// =============================================================================
// Retries and Failures
// =============================================================================

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let flaky = tile_url(BASE, 0, 0, 0, 0);
    let source = MockTileSource::new().with_transient_failures(flaky.clone(), 2);
    let (f, source) = fetcher(source, quick_config());
    let roi = Roi::new([0.0, 0.0, 0.0], [1.0, 10.0, 10.0]);

    let response = f.fetch_stack_space(&roi, 0).await.unwrap();

    assert_voxels(&response.volume, [0, 0, 0]);
    assert_eq!(source.requests_for(&flaky).await, 3);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let flaky = tile_url(BASE, 0, 0, 0, 0);
    let source = MockTileSource::new().with_transient_failures(flaky.clone(), 3);
    let (f, source) = fetcher(source, quick_config());
    let roi = Roi::new([0.0, 0.0, 0.0], [1.0, 10.0, 10.0]);

    match f.fetch_stack_space(&roi, 0).await {
        Err(VolumeError::TileFetch(e)) => {
            assert_eq!(e.key, key(0, 0, 0, 0));
            assert_eq!(e.attempts, 3);
            assert!(matches!(e.source, TileFailure::Io(IoError::Connection(_))));
        }
        other => panic!("expected a tile fetch error, got {:?}", other.map(|r| r.stats)),
    }
    assert_eq!(source.requests_for(&flaky).await, 3);
}

#[tokio::test]
async fn test_best_effort_leaves_gaps() {
    let broken = tile_url(BASE, 1, 0, 0, 0);
    let source = MockTileSource::new().with_failure(broken.clone());
    let config = quick_config().with_best_effort(true).with_fill_value(77);
    let (f, source) = fetcher(source, config);
    let roi = Roi::new([0.0, 0.0, 0.0], [3.0, 10.0, 10.0]);

    let response = f.fetch_stack_space(&roi, 0).await.unwrap();

    assert_eq!(
        response.outcome,
        FetchOutcome::PartialWithGaps {
            failed_keys: vec![key(0, 1, 0, 0)]
        }
    );
    assert_eq!(response.stats.failed, 1);
    assert_eq!(response.stats.fetched, 2);

    let gap = response.volume.index_axis(ndarray::Axis(0), 1);
    assert!(gap.iter().all(|&v| v == 77));
    assert_eq!(response.volume[[2, 9, 9]], voxel(9, 9, 2));
    assert_eq!(source.requests_for(&broken).await, 3);
}

#[tokio::test]
async fn test_undecodable_tile_fails() {
    struct GarbageSource;

    #[async_trait::async_trait]
    impl catmaid_tiles::io::TileSource for GarbageSource {
        async fn fetch(&self, _url: &str) -> Result<bytes::Bytes, IoError> {
            Ok(bytes::Bytes::from_static(b"not an image"))
        }
    }

    let source = std::sync::Arc::new(GarbageSource);
    let f = ImageFetcher::new(test_stack(), source, quick_config().with_retries(0, Duration::ZERO))
        .unwrap();
    let roi = Roi::new([0.0, 0.0, 0.0], [1.0, 10.0, 10.0]);

    match f.fetch_stack_space(&roi, 0).await {
        Err(VolumeError::TileFetch(e)) => {
            assert_eq!(e.attempts, 1);
            assert!(matches!(e.source, TileFailure::Decode(_)));
        }
        other => panic!("expected a decode failure, got {:?}", other.map(|r| r.stats)),
    }
}

#[tokio::test]
async fn test_timeout() {
    let source = MockTileSource::new().with_delay(BASE, Duration::from_millis(500));
    let config = quick_config().with_timeout(Some(Duration::from_millis(50)));
    let (f, _) = fetcher(source, config);
    let roi = Roi::new([0.0, 0.0, 0.0], [1.0, 10.0, 10.0]);

    let result = f.fetch_stack_space(&roi, 0).await;

    assert!(matches!(result, Err(VolumeError::Timeout(d)) if d == Duration::from_millis(50)));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrent_matches_sequential() {
    let roi = Roi::new([0.0, 100.0, 100.0], [4.0, 700.0, 700.0]);

    let (sequential, _) = fetcher(MockTileSource::new(), quick_config());
    let expected = sequential.fetch_stack_space(&roi, 0).await.unwrap();

    let source = MockTileSource::new().with_delay(BASE, Duration::from_millis(5));
    let (concurrent, source) = fetcher(source, quick_config().with_concurrency(4));
    let actual = concurrent.fetch_stack_space(&roi, 0).await.unwrap();

    assert_eq!(actual.volume, expected.volume);
    assert_eq!(actual.stats, expected.stats);
    assert_eq!(actual.stats.tiles, 4 * 3 * 3);

    assert!(source.max_in_flight() > 1);
    assert!(source.max_in_flight() <= 4);
}

#[tokio::test]
async fn test_concurrent_failure_aborts() {
    let broken = tile_url(BASE, 2, 1, 1, 0);
    let source = MockTileSource::new().with_failure(broken);
    let (f, _) = fetcher(source, quick_config().with_concurrency(4));
    let roi = Roi::new([0.0, 100.0, 100.0], [4.0, 700.0, 700.0]);

    let result = f.fetch_stack_space(&roi, 0).await;

    assert!(matches!(result, Err(VolumeError::TileFetch(e)) if e.key == key(0, 2, 1, 1)));
}

#[tokio::test]
async fn test_concurrent_best_effort() {
    let broken = tile_url(BASE, 2, 1, 1, 0);
    let source = MockTileSource::new().with_failure(broken);
    let config = quick_config().with_concurrency(3).with_best_effort(true);
    let (f, _) = fetcher(source, config);
    let roi = Roi::new([0.0, 100.0, 100.0], [4.0, 700.0, 700.0]);

    let response = f.fetch_stack_space(&roi, 0).await.unwrap();

    assert_eq!(
        response.outcome,
        FetchOutcome::PartialWithGaps {
            failed_keys: vec![key(0, 2, 1, 1)]
        }
    );
    assert_eq!(response.stats.fetched, 35);
}

// =============================================================================
// Mirrors
// =============================================================================

const SLOW: &str = "http://slow.test/stack/";
const FAST: &str = "http://fast.test/stack/";

fn two_mirror_stack() -> Stack {
    Stack::new(Point3::new(2048, 2048, 64))
        .with_mirror(mirror(SLOW).with_title("slow").with_position(0))
        .with_mirror(mirror(FAST).with_title("fast").with_position(1))
}

#[tokio::test]
async fn test_set_mirror_by_title_and_position() {
    let (mut f, source) = fetcher_for(two_mirror_stack(), MockTileSource::new(), quick_config());
    assert_eq!(f.mirror().title(), "slow");

    f.set_mirror(&MirrorSelector::Title("fast".into())).unwrap();
    let roi = Roi::new([0.0, 0.0, 0.0], [1.0, 10.0, 10.0]);
    f.fetch_stack_space(&roi, 0).await.unwrap();
    assert_eq!(source.get_requests().await, vec![tile_url(FAST, 0, 0, 0, 0)]);

    f.set_mirror(&MirrorSelector::Position(0)).unwrap();
    assert_eq!(f.mirror().image_base(), SLOW);

    assert!(f.set_mirror(&MirrorSelector::Position(7)).is_err());
    assert_eq!(f.mirror().image_base(), SLOW);
}

#[tokio::test]
async fn test_fastest_mirror_is_selected() {
    let source = MockTileSource::new().with_delay(SLOW, Duration::from_millis(50));
    let (mut f, source) = fetcher_for(two_mirror_stack(), source, quick_config());

    let selected = f.set_fastest_mirror(2, false).await.unwrap();
    assert_eq!(selected.title(), "fast");
    assert_eq!(source.request_count(), 4);

    source.reset_tracking();
    let roi = Roi::new([5.0, 0.0, 0.0], [6.0, 10.0, 10.0]);
    f.fetch_stack_space(&roi, 0).await.unwrap();
    assert!(source
        .get_requests()
        .await
        .last()
        .is_some_and(|url| url.starts_with(FAST)));
}

#[tokio::test]
async fn test_unreachable_mirrors() {
    let stack = two_mirror_stack();
    let canary_slow = tile_url(SLOW, 0, 0, 0, 0);
    let canary_fast = tile_url(FAST, 0, 0, 0, 0);
    let source = MockTileSource::new()
        .with_failure(canary_slow)
        .with_failure(canary_fast);
    let (mut f, _) = fetcher_for(stack, source, quick_config());

    assert!(f.set_fastest_mirror(1, true).await.is_err());
}
