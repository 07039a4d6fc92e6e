//! Tile index calculation.
//!
//! Maps a region of interest in scaled stack space onto the tiles that cover
//! it. Every [`TilePlacement`] names one tile, the part of that tile to copy
//! and where that part lands in the output volume.
//!
//! # Coverage
//!
//! The destination rectangles of a plan partition the output volume: every
//! voxel is written by exactly one placement.
//!
//! # Axis order
//!
//! Everything here is in the stack's native `(z, y, x)` order.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::stack::StackMirror;

// =============================================================================
// Tile Key
// =============================================================================

/// Identifies one fetchable tile. Used as the tile cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Mirror identity (its image base URL)
    pub mirror: Arc<str>,

    /// Zoom level (0 = full resolution)
    pub zoom: i32,

    /// Slice index
    pub depth: i64,

    /// Tile row (y / tile height)
    pub row: i64,

    /// Tile column (x / tile width)
    pub col: i64,
}

impl TileKey {
    pub fn new(mirror: impl Into<Arc<str>>, zoom: i32, depth: i64, row: i64, col: i64) -> Self {
        Self {
            mirror: mirror.into(),
            zoom,
            depth,
            row,
            col,
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[zoom={}, depth={}, row={}, col={}]",
            self.mirror, self.zoom, self.depth, self.row, self.col
        )
    }
}

// =============================================================================
// Scaled ROI
// =============================================================================

/// Half-open integer box in scaled stack space, `(z, y, x)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScaledRoi {
    pub min: [i64; 3],
    pub max: [i64; 3],
}

impl ScaledRoi {
    /// Build from two corners in any order.
    pub fn from_corners(a: [i64; 3], b: [i64; 3]) -> Self {
        let mut min = [0; 3];
        let mut max = [0; 3];
        for axis in 0..3 {
            min[axis] = a[axis].min(b[axis]);
            max[axis] = a[axis].max(b[axis]);
        }
        Self { min, max }
    }

    /// Number of voxels per axis.
    pub fn shape(&self) -> [usize; 3] {
        let mut shape = [0; 3];
        for axis in 0..3 {
            shape[axis] = self.max[axis].saturating_sub(self.min[axis]) as usize;
        }
        shape
    }

    pub fn is_empty(&self) -> bool {
        self.shape().contains(&0)
    }
}

// =============================================================================
// Tile Placement
// =============================================================================

/// One tile's contribution to the output volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePlacement {
    pub key: TileKey,

    /// The slice is listed as broken; fill instead of fetching
    pub broken: bool,

    /// Tile-local rows to copy
    pub src_rows: Range<usize>,

    /// Tile-local columns to copy
    pub src_cols: Range<usize>,

    /// `(z, y, x)` offset of the copied rectangle in the output volume
    pub dst_offset: [usize; 3],
}

impl TilePlacement {
    /// Shape of the copied block, `(1, rows, cols)`.
    pub fn block_shape(&self) -> [usize; 3] {
        [1, self.src_rows.len(), self.src_cols.len()]
    }
}

/// The tiles needed for one ROI, in `(z, row, col)` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePlan {
    pub roi: ScaledRoi,
    pub zoom: i32,
    pub placements: Vec<TilePlacement>,
}

impl TilePlan {
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// Number of distinct tile rows and columns per slice.
    pub fn grid_size(&self) -> (usize, usize) {
        let rows: BTreeSet<i64> = self.placements.iter().map(|p| p.key.row).collect();
        let cols: BTreeSet<i64> = self.placements.iter().map(|p| p.key.col).collect();
        (rows.len(), cols.len())
    }
}

/// Compute the tiles covering `roi` at `zoom` on `mirror`.
///
/// Tiles are `tile_width x tile_height` pixels in scaled space at every zoom
/// level. Slices listed in `broken_slices` are marked for filling.
pub fn plan_tiles(
    roi: &ScaledRoi,
    zoom: i32,
    mirror: &StackMirror,
    broken_slices: &BTreeSet<i64>,
) -> TilePlan {
    let mut placements = Vec::new();

    if roi.is_empty() {
        return TilePlan {
            roi: *roi,
            zoom,
            placements,
        };
    }

    let tile_h = mirror.tile_height() as i64;
    let tile_w = mirror.tile_width() as i64;
    let [z0, y0, x0] = roi.min;
    let [z1, y1, x1] = roi.max;

    let first_row = y0.div_euclid(tile_h);
    let last_row = (y1 - 1).div_euclid(tile_h);
    let first_col = x0.div_euclid(tile_w);
    let last_col = (x1 - 1).div_euclid(tile_w);

    let mirror_id = mirror.cache_id();

    for depth in z0..z1 {
        let broken = broken_slices.contains(&depth);
        for row in first_row..=last_row {
            let (src_rows, dst_y) = clip(row * tile_h, tile_h, y0, y1);
            for col in first_col..=last_col {
                let (src_cols, dst_x) = clip(col * tile_w, tile_w, x0, x1);
                placements.push(TilePlacement {
                    key: TileKey::new(Arc::clone(&mirror_id), zoom, depth, row, col),
                    broken,
                    src_rows: src_rows.clone(),
                    src_cols,
                    dst_offset: [(depth - z0) as usize, dst_y, dst_x],
                });
            }
        }
    }

    TilePlan {
        roi: *roi,
        zoom,
        placements,
    }
}

/// Intersect the tile span `[start, start + len)` with `[lo, hi)`.
///
/// Returns the tile-local range and its offset from `lo`.
fn clip(start: i64, len: i64, lo: i64, hi: i64) -> (Range<usize>, usize) {
    let from = start.max(lo);
    let to = start.saturating_add(len).min(hi);
    (
        (from - start) as usize..(to - start) as usize,
        (from - lo) as usize,
    )
}

// =============================================================================
// Tests
// =============================================================================
