//! Stack metadata and coordinate spaces.
//!
//! This module holds the read-only configuration an image fetcher is built
//! from, and the transforms between coordinate spaces.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        StackInfo (server JSON)          │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │             ProjectStack                │
//! │  translation, resolution, orientation   │
//! │  ┌───────────────────────────────────┐  │
//! │  │              Stack                │  │
//! │  │  dimension, broken slices, canary │  │
//! │  │  ┌─────────────┐ ┌─────────────┐  │  │
//! │  │  │ StackMirror │ │ StackMirror │  │  │
//! │  │  └─────────────┘ └─────────────┘  │  │
//! │  └───────────────────────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │         CoordinateTransformer           │
//! │   project ⇄ stack ⇄ scaled (zoom n)     │
//! └─────────────────────────────────────────┘
//! ```

mod info;
mod mirror;
mod spatial;

pub use info::{AxisValues, BrokenSlices, ProjectStack, Stack, StackInfo};
pub use mirror::{MirrorInfo, StackMirror, TileSourceType};
pub use spatial::{zoom_factor, CoordinateTransformer, Dim, Point3, StackOrientation};
