//! Error types for the descriptor watcher.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for watcher operations.
pub type WatchResult<T> = Result<T, WatchError>;

/// Failures setting up or driving the filesystem watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Filesystem failure while scanning or resolving paths.
    #[error("watcher io failure")]
    Io {
        /// Operation that failed.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The notification backend rejected a watch registration.
    #[error("watch registration failure")]
    Notify {
        /// Path that could not be registered.
        path: PathBuf,
        /// Underlying notify error.
        source: notify::Error,
    },
}
