//! Image fetcher: assembles volumes from tiles.
//!
//! The ImageFetcher is the main entry point for volume requests. It
//! orchestrates:
//! - ROI conversion from project, stack or scaled space
//! - Tile planning
//! - Cache lookups
//! - Fetching and decoding with retries
//! - Writing each tile into the output volume
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         ImageFetcher                             │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │                     fetch_volume()                         │  │
//! │  │  1. ROI → scaled zyx     4. Cache or fetch + decode        │  │
//! │  │  2. Plan tiles           5. Write block into volume        │  │
//! │  │  3. Broken slice → fill  6. Reorder axes once at the end   │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! │           │                    │                     │           │
//! │           ▼                    ▼                     ▼           │
//! │    ┌───────────┐      ┌──────────────┐     ┌──────────────────┐  │
//! │    │ TileCache │      │  TileSource  │     │   TileDecoder    │  │
//! │    └───────────┘      └──────────────┘     └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Concurrency
//!
//! With `concurrency > 1`, a fixed set of worker tasks drains the tile plan
//! and sends decoded tiles to the calling task, which alone writes to the
//! output. Every tile owns a disjoint region of the output, so completion
//! order does not matter.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::{s, Array2, Array3, Axis};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::FetcherConfig;
use crate::error::{
    ConfigurationError, IoError, SinkError, TileFailure, TileFetchError, VolumeError,
};
use crate::io::TileSource;
use crate::stack::{CoordinateTransformer, Dim, Point3, ProjectStack, Stack, StackInfo, StackMirror};
use crate::volume::{reorder_volume, AxisOrder, OrientedSink, VolumeSink};

use super::cache::{CacheStats, CachedTile, TileCache};
use super::decoder::TileDecoder;
use super::index::{plan_tiles, ScaledRoi, TileKey, TilePlacement};

/// Stack axes in native volume order.
const NATIVE_AXES: [Dim; 3] = [Dim::Z, Dim::Y, Dim::X];

/// Largest scaled coordinate magnitude an ROI may reach (2^53).
const MAX_SCALED_COORD: f64 = 9_007_199_254_740_992.0;

// =============================================================================
// Requests
// =============================================================================

/// Coordinate space an ROI is given in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RoiMode {
    /// Real-world project units
    Project,
    /// Full-resolution stack pixels
    #[default]
    Stack,
    /// Stack pixels at the requested zoom level
    Scaled,
}

impl fmt::Display for RoiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Project => "project",
            Self::Stack => "stack",
            Self::Scaled => "scaled",
        };
        f.write_str(s)
    }
}

impl FromStr for RoiMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "project" => Ok(Self::Project),
            "stack" => Ok(Self::Stack),
            "scaled" => Ok(Self::Scaled),
            _ => Err(ConfigurationError::UnknownRoiMode(s.to_string())),
        }
    }
}

/// A region of interest: two opposite corners in the fetcher's output axis
/// order. The corners may be given in any order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    pub start: [f64; 3],
    pub stop: [f64; 3],
}

impl Roi {
    pub fn new(start: [f64; 3], stop: [f64; 3]) -> Self {
        Self { start, stop }
    }
}

impl FromStr for Roi {
    type Err = ConfigurationError;

    /// Parse `a0,a1,a2,b0,b1,b2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values: Vec<f64> = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| ConfigurationError::InvalidRoi(format!("'{}': {}", s, e)))?;

        if values.len() != 6 {
            return Err(ConfigurationError::InvalidRoi(format!(
                "'{}': expected 6 comma-separated values, got {}",
                s,
                values.len()
            )));
        }

        Ok(Self::new(
            [values[0], values[1], values[2]],
            [values[3], values[4], values[5]],
        ))
    }
}

/// Chooses one of a stack's mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorSelector {
    /// The mirror's `position` attribute
    Position(i32),
    /// The mirror's title
    Title(String),
}

impl MirrorSelector {
    /// A number selects by position, anything else by title.
    pub fn parse(s: &str) -> Self {
        match s.trim().parse::<i32>() {
            Ok(position) => Self::Position(position),
            Err(_) => Self::Title(s.to_string()),
        }
    }
}

impl fmt::Display for MirrorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position(p) => write!(f, "position {}", p),
            Self::Title(t) => write!(f, "'{}'", t),
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Whether every tile made it into the volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Complete,
    /// Best-effort mode filled these tiles after they kept failing
    PartialWithGaps { failed_keys: Vec<TileKey> },
}

impl FetchOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Tile counts for one volume request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchStats {
    /// Tiles in the plan
    pub tiles: usize,
    /// Served from the cache
    pub cache_hits: usize,
    /// Fetched and decoded
    pub fetched: usize,
    /// Broken slices and missing tiles written with the fill value
    pub filled: usize,
    /// Tiles that failed in best-effort mode
    pub failed: usize,
}

/// An assembled volume in output orientation.
#[derive(Debug, Clone)]
pub struct VolumeResponse {
    pub volume: Array3<u8>,
    pub outcome: FetchOutcome,
    pub stats: FetchStats,
}

/// Result of writing a volume into a caller-supplied sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub outcome: FetchOutcome,
    pub stats: FetchStats,
}

// =============================================================================
// Tile Loader
// =============================================================================

/// How a tile's pixels were obtained.
enum LoadedTile {
    Cached(CachedTile),
    Fetched(CachedTile),
    Broken,
    NotFound,
}

impl LoadedTile {
    fn pixels(&self) -> Option<&Array2<u8>> {
        match self {
            Self::Cached(tile) | Self::Fetched(tile) => Some(tile),
            Self::Broken | Self::NotFound => None,
        }
    }
}

/// Everything a fetch worker needs; cheap to clone.
struct TileLoader<S: TileSource> {
    source: Arc<S>,
    cache: Arc<TileCache>,
    decoder: TileDecoder,
    mirror: StackMirror,
    retries: u32,
    retry_backoff: Duration,
    fill_not_found: bool,
}

impl<S: TileSource> Clone for TileLoader<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            cache: Arc::clone(&self.cache),
            decoder: self.decoder,
            mirror: self.mirror.clone(),
            retries: self.retries,
            retry_backoff: self.retry_backoff,
            fill_not_found: self.fill_not_found,
        }
    }
}

impl<S: TileSource> TileLoader<S> {
    /// Load one tile: broken slice, then cache, then network.
    async fn load(&self, placement: &TilePlacement) -> Result<LoadedTile, TileFetchError> {
        let key = &placement.key;

        if placement.broken {
            debug!(%key, "Broken slice, filling");
            return Ok(LoadedTile::Broken);
        }

        if let Some(tile) = self.cache.get(key).await {
            debug!(%key, "Tile cache hit");
            return Ok(LoadedTile::Cached(tile));
        }

        let url = self.mirror.tile_url(key);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.fetch_once(&url).await {
                Ok(pixels) => {
                    let tile = Arc::new(pixels);
                    if let Err(e) = self.cache.put(key.clone(), Arc::clone(&tile)).await {
                        debug!(%key, reason = %e, "Tile not cached");
                    }
                    return Ok(LoadedTile::Fetched(tile));
                }
                Err(TileFailure::Io(IoError::NotFound(_))) if self.fill_not_found => {
                    warn!(url = %url, "Tile not found (404), returning blank tile");
                    return Ok(LoadedTile::NotFound);
                }
                Err(source) if attempts > self.retries => {
                    return Err(TileFetchError {
                        key: key.clone(),
                        attempts,
                        source,
                    });
                }
                Err(e) => {
                    warn!(%key, attempt = attempts, error = %e, "Tile fetch failed, retrying");
                    if !self.retry_backoff.is_zero() {
                        tokio::time::sleep(self.retry_backoff * attempts).await;
                    }
                }
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Array2<u8>, TileFailure> {
        debug!(url, "Fetching tile");
        let bytes = self.source.fetch(url).await?;
        Ok(self.decoder.decode(&bytes)?)
    }
}

// =============================================================================
// Assembly
// =============================================================================

/// Writes loaded tiles into a native-order sink and keeps the tally.
struct Assembly<'a, K: VolumeSink + ?Sized> {
    sink: &'a mut K,
    fill_value: u8,
    best_effort: bool,
    stats: FetchStats,
    failed_keys: Vec<TileKey>,
}

impl<'a, K: VolumeSink + ?Sized> Assembly<'a, K> {
    fn new(sink: &'a mut K, config: &FetcherConfig, tiles: usize) -> Self {
        Self {
            sink,
            fill_value: config.fill_value,
            best_effort: config.best_effort,
            stats: FetchStats {
                tiles,
                ..FetchStats::default()
            },
            failed_keys: Vec::new(),
        }
    }

    fn accept(
        &mut self,
        placement: &TilePlacement,
        result: Result<LoadedTile, TileFetchError>,
    ) -> Result<(), VolumeError> {
        let loaded = match result {
            Ok(loaded) => loaded,
            Err(e) if self.best_effort => {
                warn!(key = %e.key, error = %e, "Tile failed, leaving a filled gap");
                self.stats.failed += 1;
                self.failed_keys.push(e.key);
                write_tile(&mut *self.sink, placement, None, self.fill_value)?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match &loaded {
            LoadedTile::Cached(_) => self.stats.cache_hits += 1,
            LoadedTile::Fetched(_) => self.stats.fetched += 1,
            LoadedTile::Broken | LoadedTile::NotFound => self.stats.filled += 1,
        }

        write_tile(&mut *self.sink, placement, loaded.pixels(), self.fill_value)?;
        Ok(())
    }

    fn finish(self) -> SinkReport {
        let outcome = if self.failed_keys.is_empty() {
            FetchOutcome::Complete
        } else {
            FetchOutcome::PartialWithGaps {
                failed_keys: self.failed_keys,
            }
        };
        SinkReport {
            outcome,
            stats: self.stats,
        }
    }
}

/// Copy the placement's part of `tile` into the sink.
///
/// Tiles smaller than the nominal tile size (at the stack edge) are padded
/// with the fill value; `None` writes the fill value throughout.
fn write_tile<K: VolumeSink + ?Sized>(
    sink: &mut K,
    placement: &TilePlacement,
    tile: Option<&Array2<u8>>,
    fill_value: u8,
) -> Result<(), SinkError> {
    let rows = placement.src_rows.clone();
    let cols = placement.src_cols.clone();
    let offset = placement.dst_offset;

    match tile {
        Some(tile) if rows.end <= tile.nrows() && cols.end <= tile.ncols() => {
            let block = tile.slice(s![rows, cols]).insert_axis(Axis(0));
            sink.write_block(offset, block)
        }
        Some(tile) => {
            let mut block = Array3::from_elem(placement.block_shape(), fill_value);
            let row_end = rows.end.min(tile.nrows());
            let col_end = cols.end.min(tile.ncols());
            if rows.start < row_end && cols.start < col_end {
                block
                    .slice_mut(s![0, ..row_end - rows.start, ..col_end - cols.start])
                    .assign(&tile.slice(s![rows.start..row_end, cols.start..col_end]));
            }
            sink.write_block(offset, block.view())
        }
        None => {
            let block = Array3::from_elem(placement.block_shape(), fill_value);
            sink.write_block(offset, block.view())
        }
    }
}

// =============================================================================
// Image Fetcher
// =============================================================================

/// Fetches image volumes of one stack.
///
/// # Type Parameters
///
/// * `S` - Where tile bytes come from (e.g. [`HttpTileSource`](crate::io::HttpTileSource))
///
/// # Example
///
/// ```ignore
/// use catmaid_tiles::config::FetcherConfig;
/// use catmaid_tiles::io::HttpTileSource;
/// use catmaid_tiles::tile::{ImageFetcher, Roi};
///
/// let source = Arc::new(HttpTileSource::new(Duration::from_secs(1))?);
/// let info = source.fetch_stack_info(&server, 1, 5).await?;
/// let fetcher = ImageFetcher::from_stack_info(info, source, FetcherConfig::default())?;
///
/// let roi = Roi::new([0.0, 200.0, 400.0], [5.0, 250.0, 450.0]);
/// let response = fetcher.fetch_stack_space(&roi, 0).await?;
/// assert_eq!(response.volume.dim(), (5, 50, 50));
/// ```
pub struct ImageFetcher<S: TileSource + 'static> {
    stack: Stack,
    /// Project transform (if any) and zoom scaling
    transformer: CoordinateTransformer,
    has_project: bool,
    source: Arc<S>,
    cache: Arc<TileCache>,
    decoder: TileDecoder,
    config: FetcherConfig,
    /// Index into the stack's mirrors
    mirror: usize,
}

impl<S: TileSource + 'static> ImageFetcher<S> {
    /// Create a fetcher for a stack without a project transform.
    ///
    /// # Errors
    ///
    /// Fails if the stack has no mirrors or the config is invalid.
    pub fn new(stack: Stack, source: Arc<S>, config: FetcherConfig) -> Result<Self, ConfigurationError> {
        let transformer = CoordinateTransformer::identity().with_scale_z(config.scale_z);
        Self::build(stack, transformer, false, source, config)
    }

    /// Create a fetcher that also accepts project-space ROIs.
    pub fn from_project_stack(
        project_stack: ProjectStack,
        source: Arc<S>,
        config: FetcherConfig,
    ) -> Result<Self, ConfigurationError> {
        let transformer = project_stack.transformer()?.with_scale_z(config.scale_z);
        Self::build(project_stack.into_stack(), transformer, true, source, config)
    }

    /// Create a fetcher from a stack info document.
    pub fn from_stack_info(
        info: StackInfo,
        source: Arc<S>,
        config: FetcherConfig,
    ) -> Result<Self, ConfigurationError> {
        Self::from_project_stack(ProjectStack::from_stack_info(info)?, source, config)
    }

    fn build(
        stack: Stack,
        transformer: CoordinateTransformer,
        has_project: bool,
        source: Arc<S>,
        config: FetcherConfig,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        if stack.mirrors().is_empty() {
            return Err(ConfigurationError::NoMirrors);
        }

        let cache = TileCache::with_limits(config.cache_items, config.cache_bytes);
        Ok(Self {
            stack,
            transformer,
            has_project,
            source,
            cache: Arc::new(cache),
            decoder: TileDecoder::new(),
            config,
            mirror: 0,
        })
    }

    /// Share an existing tile cache, e.g. between fetchers of one stack.
    pub fn with_cache(mut self, cache: Arc<TileCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    pub fn transformer(&self) -> &CoordinateTransformer {
        &self.transformer
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    /// The mirror tiles are fetched from.
    pub fn mirror(&self) -> &StackMirror {
        &self.stack.mirrors()[self.mirror]
    }

    /// Select a mirror by position or title. The first match wins.
    pub fn set_mirror(&mut self, selector: &MirrorSelector) -> Result<&StackMirror, ConfigurationError> {
        let found = self.stack.mirrors().iter().position(|m| match selector {
            MirrorSelector::Position(p) => m.position() == *p,
            MirrorSelector::Title(t) => m.title() == t,
        });

        match found {
            Some(index) => {
                self.mirror = index;
                let mirror = self.mirror();
                info!(title = mirror.title(), base = mirror.image_base(), "Selected mirror");
                Ok(mirror)
            }
            None => Err(ConfigurationError::UnknownMirror(selector.to_string())),
        }
    }

    /// Time every mirror's canary tile and switch to the fastest.
    pub async fn set_fastest_mirror(
        &mut self,
        reps: u32,
        normalise_by_tile_size: bool,
    ) -> Result<&StackMirror, ConfigurationError> {
        let fastest = self
            .stack
            .fastest_mirror(self.source.as_ref(), reps, normalise_by_tile_size)
            .await?;
        let index = self
            .stack
            .mirrors()
            .iter()
            .position(|m| std::ptr::eq(m, fastest))
            .unwrap_or(0);

        self.mirror = index;
        let mirror = self.mirror();
        info!(title = mirror.title(), base = mirror.image_base(), "Selected fastest mirror");
        Ok(mirror)
    }

    /// Clear the tile cache.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Get tile cache statistics.
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    // =========================================================================
    // ROI conversion
    // =========================================================================

    /// Convert an ROI into half-open scaled stack bounds in native order.
    ///
    /// The minimum corner is floored and the maximum corner ceiled, so the
    /// result may overhang a non-integer ROI by less than one pixel per side.
    pub fn roi_to_scaled(
        &self,
        roi: &Roi,
        mode: RoiMode,
        zoom: i32,
    ) -> Result<ScaledRoi, ConfigurationError> {
        let axes = self.config.output_orientation.axes();
        let mut corners = [
            Point3::from_ordered(roi.start, axes),
            Point3::from_ordered(roi.stop, axes),
        ];

        if mode == RoiMode::Project {
            if !self.has_project {
                return Err(ConfigurationError::MissingProjectTransform);
            }
            corners = self.transformer.project_to_stack_roi(corners);
        }
        if mode != RoiMode::Scaled {
            corners = self.transformer.stack_to_scaled_roi(corners, 0, zoom);
        }

        let invalid = || ConfigurationError::InvalidRoi(format!("{:?}", roi));
        let in_range = |v: f64| v.is_finite() && v.abs() <= MAX_SCALED_COORD;

        let a = corners[0].to_ordered(NATIVE_AXES);
        let b = corners[1].to_ordered(NATIVE_AXES);
        let mut min = [0i64; 3];
        let mut max = [0i64; 3];
        for axis in 0..3 {
            if !in_range(a[axis]) || !in_range(b[axis]) {
                return Err(invalid());
            }
            let lo = a[axis].min(b[axis]).floor();
            let hi = a[axis].max(b[axis]).ceil();
            min[axis] = lo as i64;
            max[axis] = hi as i64;
        }

        // The volume must be addressable as one array.
        let mut voxels = 1usize;
        for axis in 0..3 {
            voxels = max[axis]
                .checked_sub(min[axis])
                .and_then(|extent| usize::try_from(extent).ok())
                .and_then(|extent| voxels.checked_mul(extent))
                .filter(|&count| count <= isize::MAX as usize)
                .ok_or_else(invalid)?;
        }

        Ok(ScaledRoi { min, max })
    }

    /// Shape of the volume an ROI yields, in output orientation.
    pub fn output_shape(
        &self,
        roi: &Roi,
        mode: RoiMode,
        zoom: i32,
    ) -> Result<[usize; 3], ConfigurationError> {
        let native = self.roi_to_scaled(roi, mode, zoom)?.shape();
        Ok(reorder_shape(native, self.config.output_orientation))
    }

    // =========================================================================
    // Fetching
    // =========================================================================

    /// Fetch the volume of an ROI, in output orientation.
    ///
    /// The volume is assembled in native `zyx` order and permuted once at the
    /// end, so the returned array may not be in standard layout.
    ///
    /// # Errors
    ///
    /// Fails on invalid ROIs, on tiles that keep failing (unless best-effort
    /// mode is on) and on timeout.
    pub async fn fetch_volume(
        &self,
        roi: &Roi,
        mode: RoiMode,
        zoom: i32,
    ) -> Result<VolumeResponse, VolumeError> {
        let scaled = self.roi_to_scaled(roi, mode, zoom)?;
        let mut native = Array3::from_elem(scaled.shape(), self.config.fill_value);

        let report = self
            .with_timeout(self.assemble(&scaled, zoom, &mut native))
            .await?;

        let volume = reorder_volume(native, AxisOrder::ZYX, self.config.output_orientation);
        Ok(VolumeResponse {
            volume,
            outcome: report.outcome,
            stats: report.stats,
        })
    }

    /// Fetch an ROI given in project space.
    pub async fn fetch_project_space(&self, roi: &Roi, zoom: i32) -> Result<VolumeResponse, VolumeError> {
        self.fetch_volume(roi, RoiMode::Project, zoom).await
    }

    /// Fetch an ROI given in full-resolution stack pixels.
    pub async fn fetch_stack_space(&self, roi: &Roi, zoom: i32) -> Result<VolumeResponse, VolumeError> {
        self.fetch_volume(roi, RoiMode::Stack, zoom).await
    }

    /// Fetch an ROI given in pixels at the requested zoom level.
    pub async fn fetch_scaled_space(&self, roi: &Roi, zoom: i32) -> Result<VolumeResponse, VolumeError> {
        self.fetch_volume(roi, RoiMode::Scaled, zoom).await
    }

    /// Fetch an ROI straight into a caller-supplied sink.
    ///
    /// The sink must already have the shape of [`output_shape`](Self::output_shape),
    /// in output orientation. Regions of a failed fetch are left as they
    /// were; callers needing atomicity should discard the sink on error.
    pub async fn fetch_into<K: VolumeSink + ?Sized>(
        &self,
        roi: &Roi,
        mode: RoiMode,
        zoom: i32,
        sink: &mut K,
    ) -> Result<SinkReport, VolumeError> {
        let scaled = self.roi_to_scaled(roi, mode, zoom)?;
        let order = self.config.output_orientation;

        let expected = reorder_shape(scaled.shape(), order);
        let actual = sink.shape();
        if expected != actual {
            return Err(SinkError::ShapeMismatch { expected, actual }.into());
        }

        if order == AxisOrder::ZYX {
            self.with_timeout(self.assemble(&scaled, zoom, sink)).await
        } else {
            let mut oriented = OrientedSink::new(sink, order);
            self.with_timeout(self.assemble(&scaled, zoom, &mut oriented))
                .await
        }
    }

    async fn with_timeout<F>(&self, fut: F) -> Result<SinkReport, VolumeError>
    where
        F: std::future::Future<Output = Result<SinkReport, VolumeError>>,
    {
        match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| VolumeError::Timeout(limit))?,
            None => fut.await,
        }
    }

    fn loader(&self) -> TileLoader<S> {
        TileLoader {
            source: Arc::clone(&self.source),
            cache: Arc::clone(&self.cache),
            decoder: self.decoder,
            mirror: self.mirror().clone(),
            retries: self.config.retries,
            retry_backoff: self.config.retry_backoff,
            fill_not_found: self.config.fill_not_found,
        }
    }

    /// Fetch every tile of `roi` and write it into a native-order sink.
    async fn assemble<K: VolumeSink + ?Sized>(
        &self,
        roi: &ScaledRoi,
        zoom: i32,
        sink: &mut K,
    ) -> Result<SinkReport, VolumeError> {
        let started = Instant::now();
        let plan = plan_tiles(roi, zoom, self.mirror(), self.stack.broken_slices());
        let workers = self.config.concurrency.min(plan.len());

        debug!(
            tiles = plan.len(),
            zoom,
            roi_min = ?roi.min,
            roi_max = ?roi.max,
            workers,
            "Planned tiles"
        );

        let mut assembly = Assembly::new(sink, &self.config, plan.len());
        let loader = self.loader();

        if workers <= 1 {
            for placement in &plan.placements {
                let result = loader.load(placement).await;
                assembly.accept(placement, result)?;
            }
        } else {
            let placements: Arc<[TilePlacement]> = plan.placements.into();
            let next = Arc::new(AtomicUsize::new(0));
            let (tx, mut rx) = mpsc::channel(workers * 2);

            // Dropping the set on an early return aborts the workers
            let mut tasks = JoinSet::new();
            for _ in 0..workers {
                let loader = loader.clone();
                let placements = Arc::clone(&placements);
                let next = Arc::clone(&next);
                let tx = tx.clone();
                tasks.spawn(async move {
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(placement) = placements.get(index) else {
                            break;
                        };
                        let result = loader.load(placement).await;
                        if tx.send((index, result)).await.is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            while let Some((index, result)) = rx.recv().await {
                assembly.accept(&placements[index], result)?;
            }
            while let Some(joined) = tasks.join_next().await {
                joined.map_err(|e| VolumeError::Worker(e.to_string()))?;
            }
        }

        let report = assembly.finish();
        let stats = &report.stats;
        info!(
            tiles = stats.tiles,
            cache_hits = stats.cache_hits,
            fetched = stats.fetched,
            filled = stats.filled,
            failed = stats.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Volume assembled"
        );
        Ok(report)
    }
}

/// Native `zyx` shape reordered into `order`.
fn reorder_shape(native: [usize; 3], order: AxisOrder) -> [usize; 3] {
    crate::volume::reorder_point(native, AxisOrder::ZYX, order)
}

// =============================================================================
// Tests
// =============================================================================
