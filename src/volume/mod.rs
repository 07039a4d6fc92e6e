//! Output volumes and axis orientation.
//!
//! Volumes are assembled in the stack's native `zyx` order. The orientation
//! adapter converts ROIs and finished volumes between native order and the
//! order a caller asked for; sinks receive the assembled pixels.

mod orientation;
mod sink;

pub use orientation::{reorder_point, reorder_volume, AxisOrder};
pub use sink::{MmapVolume, OrientedSink, VolumeSink};
