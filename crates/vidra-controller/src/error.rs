//! Error types for registry operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Failures admitting or manipulating managed torrents.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The descriptor bytes did not decode as metainfo.
    #[error("descriptor rejected")]
    Metainfo {
        /// Underlying decode error.
        #[from]
        source: vidra_torrent_core::EngineError,
    },
    /// Neither the requested category nor the configured default exists.
    #[error("unknown category")]
    UnknownCategory {
        /// Category asked for.
        name: String,
        /// Default that was tried as a fallback.
        fallback: String,
    },
    /// The engine refused the torrent; the registry slot was rolled back.
    #[error("engine rejected torrent")]
    Engine {
        /// Underlying engine error.
        source: anyhow::Error,
    },
    /// A descriptor could not be read from disk.
    #[error("descriptor io failure")]
    Io {
        /// Path of the descriptor.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A magnet URI could not be resolved into metainfo.
    #[error("magnet resolution failed")]
    Magnet {
        /// The magnet URI that failed.
        uri: String,
        /// Underlying resolver error.
        source: anyhow::Error,
    },
}
