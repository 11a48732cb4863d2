//! Error types for metainfo handling.

use thiserror::Error;

/// Result alias for engine-core operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures decoding or validating torrent descriptors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The descriptor bytes were not a valid bencoded metainfo document.
    #[error("metainfo decode failure")]
    Metainfo {
        /// Underlying decoder error.
        source: lava_torrent::LavaTorrentError,
    },
    /// An infohash string was not 40 hex characters.
    #[error("invalid infohash")]
    InvalidInfoHash {
        /// Offending value.
        value: String,
    },
}
