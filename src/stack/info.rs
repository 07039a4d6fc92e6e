//! Stack and project-stack metadata.
//!
//! These records are built once from the server's
//! `{project_id}/stack/{stack_id}/info` document and then treated as
//! read-only configuration.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigurationError, IoError};
use crate::io::TileSource;

use super::mirror::{MirrorInfo, StackMirror};
use super::spatial::{CoordinateTransformer, Point3, StackOrientation};

// =============================================================================
// Stack Info Document
// =============================================================================

/// Per-axis values where any axis may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisValues {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub z: Option<f64>,
}

impl AxisValues {
    fn or(self, default: f64) -> Point3<f64> {
        Point3::new(
            self.x.unwrap_or(default),
            self.y.unwrap_or(default),
            self.z.unwrap_or(default),
        )
    }
}

/// Broken slices arrive either as a list or as an object keyed by slice index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BrokenSlices {
    List(Vec<i64>),
    Map(HashMap<String, serde_json::Value>),
}

impl Default for BrokenSlices {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl BrokenSlices {
    fn indices(&self) -> Result<BTreeSet<i64>, ConfigurationError> {
        match self {
            Self::List(list) => Ok(list.iter().copied().collect()),
            Self::Map(map) => map
                .keys()
                .map(|k| {
                    k.trim().parse::<i64>().map_err(|_| {
                        ConfigurationError::InvalidMetadata(format!("bad broken slice index '{}'", k))
                    })
                })
                .collect(),
        }
    }
}

/// The server's stack info document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackInfo {
    pub dimension: Point3<u64>,
    #[serde(default)]
    pub translation: Option<AxisValues>,
    #[serde(default)]
    pub resolution: Option<AxisValues>,
    #[serde(default)]
    pub orientation: u8,
    #[serde(default)]
    pub broken_slices: BrokenSlices,
    #[serde(default)]
    pub canary_location: Option<Point3<i64>>,
    #[serde(default)]
    pub mirrors: Vec<MirrorInfo>,
}

// =============================================================================
// Stack
// =============================================================================

/// An image stack: voxel dimensions, broken slices and tile mirrors.
#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    dimension: Point3<u64>,
    broken_slices: BTreeSet<i64>,
    canary_location: Point3<i64>,
    mirrors: Vec<StackMirror>,
}

impl Stack {
    pub fn new(dimension: Point3<u64>) -> Self {
        Self {
            dimension,
            broken_slices: BTreeSet::new(),
            canary_location: Point3::default(),
            mirrors: Vec::new(),
        }
    }

    pub fn with_broken_slices(mut self, slices: impl IntoIterator<Item = i64>) -> Self {
        self.broken_slices.extend(slices);
        self
    }

    pub fn with_canary_location(mut self, location: Point3<i64>) -> Self {
        self.canary_location = location;
        self
    }

    /// Add a mirror, keeping mirrors ordered by `(position, title)`.
    pub fn with_mirror(mut self, mirror: StackMirror) -> Self {
        self.mirrors.push(mirror);
        self.mirrors
            .sort_by(|a, b| (a.position(), a.title()).cmp(&(b.position(), b.title())));
        self
    }

    pub fn dimension(&self) -> Point3<u64> {
        self.dimension
    }

    pub fn broken_slices(&self) -> &BTreeSet<i64> {
        &self.broken_slices
    }

    pub fn is_broken(&self, z: i64) -> bool {
        self.broken_slices.contains(&z)
    }

    pub fn canary_location(&self) -> Point3<i64> {
        self.canary_location
    }

    pub fn mirrors(&self) -> &[StackMirror] {
        &self.mirrors
    }

    /// Find the fastest reachable mirror by timing its canary tile.
    ///
    /// Each mirror's canary tile is requested `reps` times. Mirrors that
    /// cannot be connected to are skipped; a mirror that answers with an
    /// error status still counts as reachable.
    pub async fn fastest_mirror<S: TileSource + ?Sized>(
        &self,
        source: &S,
        reps: u32,
        normalise_by_tile_size: bool,
    ) -> Result<&StackMirror, ConfigurationError> {
        let mut best: Option<(&StackMirror, f64)> = None;

        for mirror in &self.mirrors {
            let (key, _) = mirror.tile_containing(self.canary_location, 0);
            let url = mirror.tile_url(&key);

            let started = Instant::now();
            let mut reachable = true;
            for _ in 0..reps.max(1) {
                match source.fetch(&url).await {
                    Ok(_) | Err(IoError::NotFound(_)) | Err(IoError::Status { .. }) => {}
                    Err(e) => {
                        debug!(mirror = mirror.title(), error = %e, "Mirror unreachable");
                        reachable = false;
                        break;
                    }
                }
            }
            if !reachable {
                continue;
            }

            let mut elapsed = started.elapsed().as_secs_f64();
            if normalise_by_tile_size {
                elapsed /= (mirror.tile_width() as f64) * (mirror.tile_height() as f64);
            }
            debug!(mirror = mirror.title(), elapsed, "Timed mirror");

            if best.map_or(true, |(_, fastest)| elapsed < fastest) {
                best = Some((mirror, elapsed));
            }
        }

        best.map(|(mirror, _)| mirror)
            .ok_or(ConfigurationError::NoReachableMirror)
    }
}

// =============================================================================
// Project Stack
// =============================================================================

/// A stack placed in a project, with its project-space transform.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectStack {
    stack: Stack,
    translation: Point3<f64>,
    resolution: Point3<f64>,
    orientation: StackOrientation,
}

impl ProjectStack {
    pub fn new(
        stack: Stack,
        translation: Point3<f64>,
        resolution: Point3<f64>,
        orientation: StackOrientation,
    ) -> Self {
        Self {
            stack,
            translation,
            resolution,
            orientation,
        }
    }

    /// Build from a stack info document.
    ///
    /// Missing resolution axes default to 1 and missing translation axes to 0.
    ///
    /// # Errors
    ///
    /// Fails if translation or resolution is absent altogether, or if any
    /// mirror or the orientation is invalid.
    pub fn from_stack_info(info: StackInfo) -> Result<Self, ConfigurationError> {
        let translation = info
            .translation
            .ok_or(ConfigurationError::MissingProjectTransform)?
            .or(0.0);
        let resolution = info
            .resolution
            .ok_or(ConfigurationError::MissingProjectTransform)?
            .or(1.0);
        let orientation = StackOrientation::from_id(info.orientation)?;

        let mut stack = Stack::new(info.dimension)
            .with_broken_slices(info.broken_slices.indices()?)
            .with_canary_location(info.canary_location.unwrap_or_default());
        for mirror in &info.mirrors {
            stack = stack.with_mirror(StackMirror::from_info(mirror)?);
        }

        Ok(Self::new(stack, translation, resolution, orientation))
    }

    /// Parse a stack info JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let info: StackInfo = serde_json::from_str(json)
            .map_err(|e| ConfigurationError::InvalidMetadata(e.to_string()))?;
        Self::from_stack_info(info)
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn into_stack(self) -> Stack {
        self.stack
    }

    pub fn translation(&self) -> Point3<f64> {
        self.translation
    }

    pub fn resolution(&self) -> Point3<f64> {
        self.resolution
    }

    pub fn orientation(&self) -> StackOrientation {
        self.orientation
    }

    /// Transformer between this stack's pixels and project space.
    pub fn transformer(&self) -> Result<CoordinateTransformer, ConfigurationError> {
        CoordinateTransformer::new(self.resolution, self.translation, self.orientation)
    }
}

// =============================================================================
// Tests
// =============================================================================
