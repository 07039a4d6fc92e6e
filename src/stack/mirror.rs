//! Stack mirrors and tile URL layouts.
//!
//! A mirror is one HTTP location serving the tiles of a stack. Each mirror
//! declares a tile source type, which fixes how a tile's depth, row, column
//! and zoom level are laid out in its URL.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::tile::TileKey;

use super::spatial::Point3;

// =============================================================================
// Tile Source Type
// =============================================================================

/// Tile source layouts known to the server, by numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileSourceType {
    FileBased = 1,
    RequestQuery = 2,
    Hdf5 = 3,
    FileBasedWithZoomDirs = 4,
    DirBased = 5,
    DvidImageblk = 6,
    RenderService = 7,
    DvidImagetile = 8,
    Flixserver = 9,
    H2n5Tiles = 10,
}

impl TileSourceType {
    /// Look up a tile source type by id.
    pub fn from_id(id: u8) -> Result<Self, ConfigurationError> {
        let kind = match id {
            1 => Self::FileBased,
            2 => Self::RequestQuery,
            3 => Self::Hdf5,
            4 => Self::FileBasedWithZoomDirs,
            5 => Self::DirBased,
            6 => Self::DvidImageblk,
            7 => Self::RenderService,
            8 => Self::DvidImagetile,
            9 => Self::Flixserver,
            10 => Self::H2n5Tiles,
            other => return Err(ConfigurationError::UnknownTileSourceType(other)),
        };
        Ok(kind)
    }

    /// Numeric id used by the server.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Whether tile URLs can be generated for this type.
    pub fn is_supported(self) -> bool {
        self.layout().is_some()
    }

    fn layout(self) -> Option<UrlLayout> {
        match self {
            Self::FileBased | Self::Flixserver => Some(UrlLayout::DepthRowColZoom),
            Self::FileBasedWithZoomDirs => Some(UrlLayout::DepthZoomRowCol),
            Self::DirBased => Some(UrlLayout::ZoomDepthRowCol),
            Self::RenderService => Some(UrlLayout::RenderService),
            _ => None,
        }
    }
}

impl TryFrom<u8> for TileSourceType {
    type Error = ConfigurationError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::from_id(id)
    }
}

impl fmt::Display for TileSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.id())
    }
}

/// Path layouts of the supported tile source types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UrlLayout {
    /// `{base}{depth}/{row}_{col}_{zoom}.{ext}`
    DepthRowColZoom,
    /// `{base}{depth}/{zoom}/{row}_{col}.{ext}`
    DepthZoomRowCol,
    /// `{base}{zoom}/{depth}/{row}/{col}.{ext}`
    ZoomDepthRowCol,
    /// `{base}largeDataTileSource/{width}/{height}/{zoom}/{depth}/{row}/{col}.{ext}`
    RenderService,
}

// =============================================================================
// Mirror metadata
// =============================================================================

/// One entry of the `mirrors` list in a stack info document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorInfo {
    pub image_base: String,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tile_source_type: u8,
    pub file_extension: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub position: i32,
}

// =============================================================================
// Stack Mirror
// =============================================================================

/// A tile source for a stack. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct StackMirror {
    /// Base URL, always ending in `/`; doubles as the cache identity
    image_base: Arc<str>,
    tile_width: u32,
    tile_height: u32,
    tile_source_type: TileSourceType,
    layout: UrlLayout,
    /// File extension without a leading dot
    file_extension: String,
    title: String,
    position: i32,
}

impl StackMirror {
    /// Create a mirror.
    ///
    /// # Errors
    ///
    /// Fails if the tile source type has no URL layout, or a tile dimension
    /// is zero.
    pub fn new(
        image_base: &str,
        tile_width: u32,
        tile_height: u32,
        tile_source_type: TileSourceType,
        file_extension: &str,
    ) -> Result<Self, ConfigurationError> {
        let layout = tile_source_type
            .layout()
            .ok_or(ConfigurationError::UnsupportedTileSource(tile_source_type.id()))?;

        if tile_width == 0 || tile_height == 0 {
            return Err(ConfigurationError::InvalidMetadata(format!(
                "tile size must be non-zero, got {}x{}",
                tile_width, tile_height
            )));
        }

        let image_base = if image_base.ends_with('/') {
            image_base.to_string()
        } else {
            format!("{}/", image_base)
        };

        Ok(Self {
            image_base: image_base.into(),
            tile_width,
            tile_height,
            tile_source_type,
            layout,
            file_extension: file_extension.trim_start_matches('.').to_string(),
            title: String::new(),
            position: 0,
        })
    }

    /// Build a mirror from stack info metadata.
    pub fn from_info(info: &MirrorInfo) -> Result<Self, ConfigurationError> {
        let kind = TileSourceType::from_id(info.tile_source_type)?;
        Ok(Self::new(
            &info.image_base,
            info.tile_width,
            info.tile_height,
            kind,
            &info.file_extension,
        )?
        .with_title(info.title.clone())
        .with_position(info.position))
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_position(mut self, position: i32) -> Self {
        self.position = position;
        self
    }

    pub fn image_base(&self) -> &str {
        &self.image_base
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    pub fn tile_source_type(&self) -> TileSourceType {
        self.tile_source_type
    }

    pub fn file_extension(&self) -> &str {
        &self.file_extension
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    /// Identity of this mirror inside tile cache keys.
    pub fn cache_id(&self) -> Arc<str> {
        Arc::clone(&self.image_base)
    }

    /// Absolute URL of a tile.
    pub fn tile_url(&self, key: &TileKey) -> String {
        let base = &self.image_base;
        let ext = &self.file_extension;
        match self.layout {
            UrlLayout::DepthRowColZoom => format!(
                "{}{}/{}_{}_{}.{}",
                base, key.depth, key.row, key.col, key.zoom, ext
            ),
            UrlLayout::DepthZoomRowCol => format!(
                "{}{}/{}/{}_{}.{}",
                base, key.depth, key.zoom, key.row, key.col, ext
            ),
            UrlLayout::ZoomDepthRowCol => format!(
                "{}{}/{}/{}/{}.{}",
                base, key.zoom, key.depth, key.row, key.col, ext
            ),
            UrlLayout::RenderService => format!(
                "{}largeDataTileSource/{}/{}/{}/{}/{}/{}.{}",
                base,
                self.tile_width,
                self.tile_height,
                key.zoom,
                key.depth,
                key.row,
                key.col,
                ext
            ),
        }
    }

    /// Tile holding a scaled-space pixel, and the pixel's offset within it.
    pub fn tile_containing(&self, scaled: Point3<i64>, zoom: i32) -> (TileKey, Point3<i64>) {
        let width = self.tile_width as i64;
        let height = self.tile_height as i64;
        let row = scaled.y.div_euclid(height);
        let col = scaled.x.div_euclid(width);

        let key = TileKey::new(self.cache_id(), zoom, scaled.z, row, col);
        let offset = Point3::new(scaled.x - col * width, scaled.y - row * height, 0);
        (key, offset)
    }
}

// =============================================================================
// Tests
// =============================================================================
