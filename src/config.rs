//! Configuration for the image fetcher and the command-line tool.
//!
//! This module provides:
//! - [`FetcherConfig`]: typed options of an [`ImageFetcher`](crate::tile::ImageFetcher)
//!   with documented defaults
//! - [`Cli`]: command-line arguments via clap, with `CATMAID_` environment
//!   variables
//!
//! # Example
//!
//! ```
//! use catmaid_tiles::config::FetcherConfig;
//! use catmaid_tiles::volume::AxisOrder;
//!
//! let config = FetcherConfig::default()
//!     .with_concurrency(8)
//!     .with_output_orientation(AxisOrder::XYZ)
//!     .with_best_effort(true);
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Environment Variables
//!
//! - `CATMAID_SERVER` - Server root URL (required)
//! - `CATMAID_PROJECT_ID` / `CATMAID_STACK_ID` - Stack to read (required)
//! - `CATMAID_ROI` - ROI as two comma-separated corners in output axis order,
//!   e.g. `z0,y0,x0,z1,y1,x1` for zyx (required)
//! - `CATMAID_ROI_MODE` - `project`, `stack` or `scaled` (default: stack)
//! - `CATMAID_ZOOM` - Zoom level (default: 0)
//! - `CATMAID_ORIENTATION` - Output axis order (default: zyx)
//! - `CATMAID_MIRROR` - Mirror position or title
//! - `CATMAID_CACHE_ITEMS` - Max cached tiles (default: 10)
//! - `CATMAID_CACHE_BYTES` - Max cached bytes (default: unbounded)
//! - `CATMAID_CONCURRENCY` - Fetch workers (default: 1)
//! - `CATMAID_OUTPUT` - Output file (default: volume.raw)

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

use crate::error::ConfigurationError;
use crate::tile::{MirrorSelector, Roi, RoiMode, DEFAULT_CACHE_ITEMS};
use crate::volume::AxisOrder;

// =============================================================================
// Default Values
// =============================================================================

/// Default number of concurrent fetch workers (sequential).
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Default fill value for broken slices, missing tiles and gaps.
pub const DEFAULT_FILL_VALUE: u8 = 0;

/// Default number of retries per tile after the first attempt.
pub const DEFAULT_RETRIES: u32 = 2;

/// Default base delay between retries.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Default per-request timeout of the HTTP tile source, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 1000;

/// Default output file of the command-line tool.
pub const DEFAULT_OUTPUT: &str = "volume.raw";

// =============================================================================
// Fetcher Configuration
// =============================================================================

/// Options of an image fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct FetcherConfig {
    /// Maximum number of cached tiles; `None` is unbounded, `Some(0)`
    /// disables caching. Default: 10.
    pub cache_items: Option<usize>,

    /// Maximum total size of cached pixel data; `None` is unbounded.
    pub cache_bytes: Option<usize>,

    /// Axis order of ROIs passed in and volumes returned. Default: `zyx`.
    pub output_orientation: AxisOrder,

    /// Number of concurrent fetch workers; 0 and 1 both mean sequential.
    pub concurrency: usize,

    /// Value written for broken slices, missing tiles and best-effort gaps.
    pub fill_value: u8,

    /// Fill failed tiles and carry on instead of aborting the volume.
    pub best_effort: bool,

    /// Retries per tile after the first failed attempt.
    pub retries: u32,

    /// Base delay between retries, multiplied by the attempt number.
    pub retry_backoff: Duration,

    /// Treat a 404 tile as blank instead of as a failure.
    pub fill_not_found: bool,

    /// Abort a volume fetch that takes longer than this.
    pub timeout: Option<Duration>,

    /// Rescale the depth axis with zoom level too.
    ///
    /// Broken slices are then matched against the rescaled depth index.
    pub scale_z: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            cache_items: Some(DEFAULT_CACHE_ITEMS),
            cache_bytes: None,
            output_orientation: AxisOrder::ZYX,
            concurrency: DEFAULT_CONCURRENCY,
            fill_value: DEFAULT_FILL_VALUE,
            best_effort: false,
            retries: DEFAULT_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            fill_not_found: true,
            timeout: None,
            scale_z: false,
        }
    }
}

impl FetcherConfig {
    pub fn with_cache_limits(mut self, items: Option<usize>, bytes: Option<usize>) -> Self {
        self.cache_items = items;
        self.cache_bytes = bytes;
        self
    }

    pub fn with_output_orientation(mut self, order: AxisOrder) -> Self {
        self.output_orientation = order;
        self
    }

    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers;
        self
    }

    pub fn with_fill_value(mut self, value: u8) -> Self {
        self.fill_value = value;
        self
    }

    pub fn with_best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = best_effort;
        self
    }

    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_fill_not_found(mut self, fill: bool) -> Self {
        self.fill_not_found = fill;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_scale_z(mut self, scale_z: bool) -> Self {
        self.scale_z = scale_z;
        self
    }

    /// Whether tiles are fetched by a worker pool.
    pub fn is_concurrent(&self) -> bool {
        self.concurrency > 1
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.cache_bytes == Some(0) {
            return Err(ConfigurationError::InvalidOption {
                name: "cache_bytes",
                message: "must be greater than 0 (use cache_items = 0 to disable caching)"
                    .to_string(),
            });
        }

        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigurationError::InvalidOption {
                name: "timeout",
                message: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// catmaid-tiles - Fetch image volumes from a CATMAID tile server.
///
/// Converts a region of interest into tile requests, fetches and caches the
/// tiles, and writes the assembled volume to a raw `u8` file.
#[derive(Parser, Debug, Clone)]
#[command(name = "catmaid-tiles")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    // =========================================================================
    // Source
    // =========================================================================
    /// Root URL of the server.
    #[arg(long, env = "CATMAID_SERVER")]
    pub server: String,

    /// Project ID.
    #[arg(long, env = "CATMAID_PROJECT_ID")]
    pub project_id: u64,

    /// Stack ID.
    #[arg(long, env = "CATMAID_STACK_ID")]
    pub stack_id: u64,

    /// Mirror to read from, by position or title.
    ///
    /// Defaults to the first mirror.
    #[arg(long, env = "CATMAID_MIRROR", conflicts_with = "fastest_mirror")]
    pub mirror: Option<String>,

    /// Time every mirror's canary tile and use the fastest.
    #[arg(long, default_value_t = false)]
    pub fastest_mirror: bool,

    /// Per-request timeout in milliseconds.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_MS, env = "CATMAID_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    // =========================================================================
    // Region
    // =========================================================================
    /// Region of interest as two corners in output axis order, e.g.
    /// `z0,y0,x0,z1,y1,x1` for the default zyx.
    #[arg(long, env = "CATMAID_ROI", allow_hyphen_values = true)]
    pub roi: String,

    /// Coordinate space of the ROI: project, stack or scaled.
    #[arg(long, default_value = "stack", env = "CATMAID_ROI_MODE")]
    pub roi_mode: String,

    /// Zoom level (0 = full resolution).
    #[arg(long, default_value_t = 0, env = "CATMAID_ZOOM", allow_hyphen_values = true)]
    pub zoom: i32,

    /// Output axis order (zyx, xyz or any permutation).
    #[arg(long, default_value = "zyx", env = "CATMAID_ORIENTATION")]
    pub orientation: String,

    /// Also rescale the depth axis with zoom level.
    #[arg(long, default_value_t = false)]
    pub scale_z: bool,

    // =========================================================================
    // Fetching
    // =========================================================================
    /// Maximum number of cached tiles (0 disables the cache).
    #[arg(long, default_value_t = DEFAULT_CACHE_ITEMS, env = "CATMAID_CACHE_ITEMS")]
    pub cache_items: usize,

    /// Maximum bytes of cached pixel data.
    #[arg(long, env = "CATMAID_CACHE_BYTES")]
    pub cache_bytes: Option<usize>,

    /// Number of concurrent fetch workers (0 or 1 = sequential).
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, env = "CATMAID_CONCURRENCY")]
    pub concurrency: usize,

    /// Value for broken slices, missing tiles and gaps.
    #[arg(long, default_value_t = DEFAULT_FILL_VALUE, env = "CATMAID_FILL_VALUE")]
    pub fill_value: u8,

    /// Fill tiles that keep failing instead of aborting.
    #[arg(long, default_value_t = false, env = "CATMAID_BEST_EFFORT")]
    pub best_effort: bool,

    /// Retries per tile.
    #[arg(long, default_value_t = DEFAULT_RETRIES, env = "CATMAID_RETRIES")]
    pub retries: u32,

    /// Base delay between retries in milliseconds.
    #[arg(long, default_value_t = DEFAULT_RETRY_BACKOFF.as_millis() as u64)]
    pub retry_backoff_ms: u64,

    /// Treat 404 tiles as failures instead of blank tiles.
    #[arg(long, default_value_t = false)]
    pub no_fill_not_found: bool,

    /// Abort the whole fetch after this many seconds.
    #[arg(long, env = "CATMAID_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    // =========================================================================
    // Output
    // =========================================================================
    /// File to write the raw volume to.
    #[arg(short, long, default_value = DEFAULT_OUTPUT, env = "CATMAID_OUTPUT")]
    pub output: PathBuf,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// Validate the arguments and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.server_url().map_err(|e| e.to_string())?;
        self.roi().map_err(|e| e.to_string())?;
        self.roi_mode().map_err(|e| e.to_string())?;
        self.fetcher_config()
            .and_then(|config| config.validate())
            .map_err(|e| e.to_string())?;

        if self.request_timeout_ms == 0 {
            return Err("request_timeout_ms must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn server_url(&self) -> Result<Url, ConfigurationError> {
        Url::parse(&self.server)
            .map_err(|e| ConfigurationError::InvalidOption {
                name: "server",
                message: e.to_string(),
            })
    }

    pub fn roi(&self) -> Result<Roi, ConfigurationError> {
        self.roi.parse()
    }

    pub fn roi_mode(&self) -> Result<RoiMode, ConfigurationError> {
        self.roi_mode.parse()
    }

    pub fn mirror_selector(&self) -> Option<MirrorSelector> {
        self.mirror.as_deref().map(MirrorSelector::parse)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Build the fetcher options from the arguments.
    pub fn fetcher_config(&self) -> Result<FetcherConfig, ConfigurationError> {
        Ok(FetcherConfig {
            cache_items: Some(self.cache_items),
            cache_bytes: self.cache_bytes,
            output_orientation: self.orientation.parse()?,
            concurrency: self.concurrency,
            fill_value: self.fill_value,
            best_effort: self.best_effort,
            retries: self.retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            fill_not_found: !self.no_fill_not_found,
            timeout: self.timeout_secs.map(Duration::from_secs),
            scale_z: self.scale_z,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
