//! Spatial primitives and the project/stack coordinate transform.
//!
//! # Coordinate Spaces
//!
//! - **Project space**: real-world units (usually nm), shared by every stack
//!   in a project.
//! - **Stack space**: voxel coordinates of one stack at full resolution
//!   (zoom level 0).
//! - **Scaled space**: stack space at some zoom level `n`, where each in-plane
//!   pixel covers `2^n` full-resolution pixels per axis. The depth axis is not
//!   rescaled unless `scale_z` is set.
//!
//! The affine map is `stack = (project - translation) / resolution` per axis,
//! with project axes mapped onto stack axes according to the stack's
//! [`StackOrientation`].

use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

// =============================================================================
// Axes and Points
// =============================================================================

/// A spatial axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dim {
    X,
    Y,
    Z,
}

impl Dim {
    /// All axes in `x, y, z` order.
    pub const ALL: [Dim; 3] = [Dim::X, Dim::Y, Dim::Z];

    /// Parse a single lower- or upper-case axis letter.
    pub fn from_char(c: char) -> Option<Dim> {
        match c.to_ascii_lowercase() {
            'x' => Some(Dim::X),
            'y' => Some(Dim::Y),
            'z' => Some(Dim::Z),
            _ => None,
        }
    }

    /// Lower-case axis letter.
    pub fn as_char(self) -> char {
        match self {
            Dim::X => 'x',
            Dim::Y => 'y',
            Dim::Z => 'z',
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A value per axis, addressable by [`Dim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Point3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T> Point3<T> {
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }

    /// Apply `f` to every component.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Point3<U> {
        Point3 {
            x: f(self.x),
            y: f(self.y),
            z: f(self.z),
        }
    }
}

impl<T: Copy> Point3<T> {
    /// Build a point from three values listed in `axes` order.
    pub fn from_ordered(values: [T; 3], axes: [Dim; 3]) -> Self {
        let mut point = Point3::new(values[0], values[0], values[0]);
        for (value, dim) in values.into_iter().zip(axes) {
            point[dim] = value;
        }
        point
    }

    /// List the components in `axes` order.
    pub fn to_ordered(&self, axes: [Dim; 3]) -> [T; 3] {
        [self[axes[0]], self[axes[1]], self[axes[2]]]
    }
}

impl<T> Index<Dim> for Point3<T> {
    type Output = T;

    fn index(&self, dim: Dim) -> &T {
        match dim {
            Dim::X => &self.x,
            Dim::Y => &self.y,
            Dim::Z => &self.z,
        }
    }
}

impl<T> IndexMut<Dim> for Point3<T> {
    fn index_mut(&mut self, dim: Dim) -> &mut T {
        match dim {
            Dim::X => &mut self.x,
            Dim::Y => &mut self.y,
            Dim::Z => &mut self.z,
        }
    }
}

// =============================================================================
// Stack Orientation
// =============================================================================

/// Orientation of a stack's image plane relative to the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StackOrientation {
    /// Image plane is the project's xy plane
    #[default]
    XY,
    /// Image plane is the project's xz plane
    XZ,
    /// Image plane is the project's zy plane
    ZY,
}

impl StackOrientation {
    /// Orientation from the server's numeric id (0, 1, 2).
    pub fn from_id(id: u8) -> Result<Self, ConfigurationError> {
        match id {
            0 => Ok(Self::XY),
            1 => Ok(Self::XZ),
            2 => Ok(Self::ZY),
            other => Err(ConfigurationError::UnknownOrientation(other.to_string())),
        }
    }

    /// The project axis that a stack axis lies along.
    pub fn stack_to_project_dim(self, dim: Dim) -> Dim {
        match (self, dim) {
            (Self::XZ, Dim::Y) => Dim::Z,
            (Self::XZ, Dim::Z) => Dim::Y,
            (Self::ZY, Dim::X) => Dim::Z,
            (Self::ZY, Dim::Z) => Dim::X,
            (_, dim) => dim,
        }
    }

    /// The stack axis that a project axis lies along.
    pub fn project_to_stack_dim(self, dim: Dim) -> Dim {
        // every orientation swaps at most one pair of axes
        self.stack_to_project_dim(dim)
    }
}

impl fmt::Display for StackOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::XY => "xy",
            Self::XZ => "xz",
            Self::ZY => "zy",
        };
        f.write_str(s)
    }
}

impl FromStr for StackOrientation {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xy" => Ok(Self::XY),
            "xz" => Ok(Self::XZ),
            "zy" => Ok(Self::ZY),
            _ => Err(ConfigurationError::UnknownOrientation(s.to_string())),
        }
    }
}

// =============================================================================
// Coordinate Transformer
// =============================================================================

/// Converts points between project, stack and scaled stack space.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateTransformer {
    resolution: Point3<f64>,
    translation: Point3<f64>,
    orientation: StackOrientation,
    scale_z: bool,
}

impl CoordinateTransformer {
    /// Create a transformer.
    ///
    /// # Errors
    ///
    /// Fails if any resolution component is zero or not finite.
    pub fn new(
        resolution: Point3<f64>,
        translation: Point3<f64>,
        orientation: StackOrientation,
    ) -> Result<Self, ConfigurationError> {
        for axis in Dim::ALL {
            let value = resolution[axis];
            if value == 0.0 || !value.is_finite() {
                return Err(ConfigurationError::InvalidResolution { axis, value });
            }
        }

        Ok(Self {
            resolution,
            translation,
            orientation,
            scale_z: false,
        })
    }

    /// Unit resolution, zero translation, xy orientation.
    pub fn identity() -> Self {
        Self {
            resolution: Point3::new(1.0, 1.0, 1.0),
            translation: Point3::default(),
            orientation: StackOrientation::XY,
            scale_z: false,
        }
    }

    /// Also rescale the depth axis when changing zoom level.
    ///
    /// Off by default; useful only for isotropic stacks.
    pub fn with_scale_z(mut self, scale_z: bool) -> Self {
        self.scale_z = scale_z;
        self
    }

    pub fn resolution(&self) -> Point3<f64> {
        self.resolution
    }

    pub fn translation(&self) -> Point3<f64> {
        self.translation
    }

    pub fn orientation(&self) -> StackOrientation {
        self.orientation
    }

    pub fn scale_z(&self) -> bool {
        self.scale_z
    }

    /// Transform a project-space point into stack space.
    ///
    /// No bounds checking: the result may lie outside the stack.
    pub fn project_to_stack(&self, project: Point3<f64>) -> Point3<f64> {
        let mut stack = Point3::default();
        for proj_dim in Dim::ALL {
            let stack_dim = self.orientation.project_to_stack_dim(proj_dim);
            stack[stack_dim] =
                (project[proj_dim] - self.translation[proj_dim]) / self.resolution[proj_dim];
        }
        stack
    }

    /// Transform a stack-space point into project space.
    pub fn stack_to_project(&self, stack: Point3<f64>) -> Point3<f64> {
        let mut project = Point3::default();
        for stack_dim in Dim::ALL {
            let proj_dim = self.orientation.stack_to_project_dim(stack_dim);
            project[proj_dim] =
                stack[stack_dim] * self.resolution[proj_dim] + self.translation[proj_dim];
        }
        project
    }

    /// Rescale a pixel coordinate from `src_zoom` to `tgt_zoom`.
    ///
    /// In-plane axes are multiplied by `2^(src_zoom - tgt_zoom)`. Swapping the
    /// two zoom levels gives the inverse transform.
    pub fn stack_to_scaled(&self, stack: Point3<f64>, src_zoom: i32, tgt_zoom: i32) -> Point3<f64> {
        let factor = zoom_factor(src_zoom, tgt_zoom);
        Point3 {
            x: stack.x * factor,
            y: stack.y * factor,
            z: if self.scale_z { stack.z * factor } else { stack.z },
        }
    }

    /// Transform both corners of a project-space box into stack space.
    pub fn project_to_stack_roi(&self, roi: [Point3<f64>; 2]) -> [Point3<f64>; 2] {
        roi.map(|p| self.project_to_stack(p))
    }

    /// Transform both corners of a stack-space box into project space.
    pub fn stack_to_project_roi(&self, roi: [Point3<f64>; 2]) -> [Point3<f64>; 2] {
        roi.map(|p| self.stack_to_project(p))
    }

    /// Rescale both corners of a box from `src_zoom` to `tgt_zoom`.
    pub fn stack_to_scaled_roi(
        &self,
        roi: [Point3<f64>; 2],
        src_zoom: i32,
        tgt_zoom: i32,
    ) -> [Point3<f64>; 2] {
        roi.map(|p| self.stack_to_scaled(p, src_zoom, tgt_zoom))
    }
}

impl Default for CoordinateTransformer {
    fn default() -> Self {
        Self::identity()
    }
}

/// Linear scale from pixels at `src_zoom` to pixels at `tgt_zoom`.
#[inline]
pub fn zoom_factor(src_zoom: i32, tgt_zoom: i32) -> f64 {
    2f64.powi(src_zoom - tgt_zoom)
}

// =============================================================================
// Tests
// =============================================================================
