//! Error types for sidecar persistence.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for tag-store operations.
pub type TagResult<T> = Result<T, TagError>;

/// Failures reading or writing a sidecar file.
#[derive(Debug, Error)]
pub enum TagError {
    /// Filesystem failure while touching the sidecar.
    #[error("sidecar io failure")]
    Io {
        /// Operation that failed.
        operation: &'static str,
        /// Sidecar path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The sidecar contents were not valid YAML key/value pairs.
    #[error("sidecar parse failure")]
    Parse {
        /// Sidecar path involved.
        path: PathBuf,
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },
}

impl TagError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
