use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Trait for fetching the raw bytes of a tile by URL.
///
/// This abstraction keeps the fetcher independent of the HTTP client, so
/// tests and alternative transports can supply tiles from anywhere.
/// Implementations must be thread-safe; they are shared across fetch workers.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Fetch the body at `url`.
    ///
    /// A missing resource must be reported as [`IoError::NotFound`] so that
    /// callers can tell it apart from transient failures.
    async fn fetch(&self, url: &str) -> Result<Bytes, IoError>;
}

#[async_trait]
impl<T: TileSource + ?Sized> TileSource for Arc<T> {
    async fn fetch(&self, url: &str) -> Result<Bytes, IoError> {
        (**self).fetch(url).await
    }
}
