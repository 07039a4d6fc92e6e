mod http_source;
mod tile_source;

pub use http_source::{stack_info_url, HttpTileSource, DEFAULT_REQUEST_TIMEOUT};
pub use tile_source::TileSource;
