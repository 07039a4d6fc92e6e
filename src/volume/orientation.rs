//! Axis orders and the permutations between them.
//!
//! Stacks are stored natively as `zyx`: axis 0 is depth, axis 1 is image
//! rows and axis 2 is image columns. Callers may ask for any other order.
//! Reordering is a pure permutation, so a volume permuted one way and back
//! again is unchanged.

use std::fmt;
use std::str::FromStr;

use ndarray::{ArrayBase, Ix3, RawData};

use crate::error::ConfigurationError;
use crate::stack::Dim;

/// Order of the three spatial axes in a point or array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AxisOrder([Dim; 3]);

impl AxisOrder {
    /// Native stack order (also known as numpy or C order)
    pub const ZYX: AxisOrder = AxisOrder([Dim::Z, Dim::Y, Dim::X]);

    /// Reverse of native order (also known as vigra or Fortran order)
    pub const XYZ: AxisOrder = AxisOrder([Dim::X, Dim::Y, Dim::Z]);

    /// Build an order from three axes.
    ///
    /// # Errors
    ///
    /// Fails if the axes are not a permutation of x, y and z.
    pub fn new(axes: [Dim; 3]) -> Result<Self, ConfigurationError> {
        let mut seen = [false; 3];
        for dim in axes {
            let slot = &mut seen[dim as usize];
            if *slot {
                let name: String = axes.iter().map(|d| d.as_char()).collect();
                return Err(ConfigurationError::InvalidAxisOrder(name));
            }
            *slot = true;
        }
        Ok(Self(axes))
    }

    pub fn axes(&self) -> [Dim; 3] {
        self.0
    }

    /// Index of `dim` within this order.
    pub fn position(&self, dim: Dim) -> usize {
        // every order holds each axis exactly once
        self.0.iter().position(|&d| d == dim).unwrap_or(0)
    }

    /// Permutation taking data in `from` order to this order.
    ///
    /// Axis `i` of the result is axis `perm[i]` of the input, the convention
    /// of `ndarray`'s `permuted_axes`.
    pub fn permutation_from(&self, from: &AxisOrder) -> [usize; 3] {
        [
            from.position(self.0[0]),
            from.position(self.0[1]),
            from.position(self.0[2]),
        ]
    }
}

impl Default for AxisOrder {
    fn default() -> Self {
        Self::ZYX
    }
}

impl fmt::Display for AxisOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dim in self.0 {
            write!(f, "{}", dim)?;
        }
        Ok(())
    }
}

impl FromStr for AxisOrder {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "numpy" | "c" | "zyx" => return Ok(Self::ZYX),
            "vigra" | "fortran" | "xyz" => return Ok(Self::XYZ),
            _ => {}
        }

        let invalid = || ConfigurationError::InvalidAxisOrder(s.to_string());
        let dims: Vec<Dim> = lower
            .chars()
            .map(Dim::from_char)
            .collect::<Option<_>>()
            .ok_or_else(invalid)?;
        let axes: [Dim; 3] = dims.try_into().map_err(|_| invalid())?;
        Self::new(axes).map_err(|_| invalid())
    }
}

/// Reorder three per-axis values from `from` order to `to` order.
pub fn reorder_point<T: Copy>(values: [T; 3], from: AxisOrder, to: AxisOrder) -> [T; 3] {
    let perm = to.permutation_from(&from);
    [values[perm[0]], values[perm[1]], values[perm[2]]]
}

/// Reorder the axes of a volume from `from` order to `to` order.
///
/// Only strides change; no data is copied.
pub fn reorder_volume<S: RawData>(
    volume: ArrayBase<S, Ix3>,
    from: AxisOrder,
    to: AxisOrder,
) -> ArrayBase<S, Ix3> {
    volume.permuted_axes(to.permutation_from(&from))
}

// =============================================================================
// Tests
// =============================================================================
