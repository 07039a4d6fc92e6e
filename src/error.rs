use std::time::Duration;

use thiserror::Error;

use crate::stack::Dim;
use crate::tile::TileKey;

/// I/O errors raised by a tile source or the metadata endpoint
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// The server answered 404 for the requested resource
    #[error("Not found: {0}")]
    NotFound(String),

    /// The server answered with another non-success status
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request did not complete within the per-request timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// A URL could not be built or parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The response body could not be interpreted
    #[error("Invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

/// Bad or missing stack/project metadata, or invalid request arguments.
///
/// These are fatal and never retried.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// A resolution component is zero (or not finite)
    #[error("Resolution must be finite and non-zero, got {axis}={value}")]
    InvalidResolution { axis: Dim, value: f64 },

    /// Project-space conversion was requested for a stack without a project transform
    #[error("Stack has no project transform: translation and resolution are required")]
    MissingProjectTransform,

    /// Tile source type id outside the known range
    #[error("Unknown tile source type: {0}")]
    UnknownTileSourceType(u8),

    /// Known tile source type without a URL layout
    #[error("Tile source type {0} is not supported (supported: 1, 4, 5, 7, 9)")]
    UnsupportedTileSource(u8),

    /// Stack orientation id or name not recognised
    #[error("Unknown stack orientation: {0}")]
    UnknownOrientation(String),

    /// Axis order is not a permutation of x, y and z
    #[error("Invalid axis order '{0}': expected a permutation of 'xyz'")]
    InvalidAxisOrder(String),

    /// ROI mode name not recognised
    #[error("Unknown ROI mode '{0}': expected 'project', 'stack' or 'scaled'")]
    UnknownRoiMode(String),

    /// Requested mirror does not exist on the stack
    #[error("Mirror not found: {0}")]
    UnknownMirror(String),

    /// The stack has no mirrors at all
    #[error("Stack has no mirrors")]
    NoMirrors,

    /// Every mirror failed the canary request
    #[error("No reachable mirrors found")]
    NoReachableMirror,

    /// ROI could not be parsed or is not usable
    #[error("Invalid ROI: {0}")]
    InvalidRoi(String),

    /// A configuration option is out of range
    #[error("Invalid option {name}: {message}")]
    InvalidOption { name: &'static str, message: String },

    /// Stack metadata is malformed
    #[error("Invalid stack metadata: {0}")]
    InvalidMetadata(String),
}

/// Tile bytes could not be decoded into a greyscale image
#[derive(Debug, Clone, Error)]
#[error("Failed to decode tile image: {message}")]
pub struct DecodeError {
    pub message: String,
}

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A single failed attempt at loading a tile.
#[derive(Debug, Clone, Error)]
pub enum TileFailure {
    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A tile could not be loaded after all retries were spent.
#[derive(Debug, Clone, Error)]
#[error("Failed to fetch tile {key} after {attempts} attempt(s): {source}")]
pub struct TileFetchError {
    /// The tile that failed
    pub key: TileKey,

    /// Total number of attempts made
    pub attempts: u32,

    /// Failure of the last attempt
    #[source]
    pub source: TileFailure,
}

/// A tile could not be retained by the tile cache.
///
/// Non-fatal: the tile is still used for the current request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheCapacityError {
    /// The tile alone is larger than the byte limit
    #[error("Tile of {size} bytes exceeds the cache byte limit of {max_bytes}")]
    TileTooLarge { size: usize, max_bytes: usize },

    /// The item limit is zero
    #[error("Tile cache is disabled (item limit is zero)")]
    Disabled,
}

/// Errors raised by an output sink
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// A block does not fit inside the output volume
    #[error("Block of shape {block:?} at offset {offset:?} exceeds volume shape {shape:?}")]
    OutOfBounds {
        offset: [usize; 3],
        block: [usize; 3],
        shape: [usize; 3],
    },

    /// A caller-supplied volume does not match the ROI
    #[error("Output shape {actual:?} does not match ROI shape {expected:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    /// The volume would hold no voxels
    #[error("Cannot create an empty volume of shape {0:?}")]
    EmptyVolume([usize; 3]),

    /// Storage error from a file-backed sink
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors that abort a volume fetch
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    TileFetch(#[from] TileFetchError),

    #[error("Output error: {0}")]
    Sink(#[from] SinkError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] IoError),

    /// The caller-level timeout expired; partial output is discarded
    #[error("Volume fetch timed out after {0:?}")]
    Timeout(Duration),

    /// A fetch worker task panicked or was cancelled
    #[error("Fetch worker failed: {0}")]
    Worker(String),
}
