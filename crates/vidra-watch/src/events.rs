//! Normalized watcher events.

use std::path::PathBuf;

/// A top-level subdirectory of the watch root grouping torrents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    /// Directory name, used as the category name.
    pub name: String,
    /// Absolute path of the category directory.
    pub fullpath: PathBuf,
    /// Absolute path of the payload directory (`<fullpath>/downloads`).
    pub download: PathBuf,
    /// Whether the payload directory exists.
    pub ready: bool,
}

/// One normalized filesystem observation.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A ready category was discovered (startup scan or rescan).
    CategoryCreated {
        /// The category that became available.
        category: Category,
    },
    /// A category (or its payload directory) went away.
    CategoryRemoved {
        /// The category that is no longer usable.
        category: Category,
    },
    /// Startup scan finished; subsequent events are live.
    CategoryLoaded,
    /// A descriptor file settled after its debounce window.
    TorrentFileCreated {
        /// Owning category.
        category: Category,
        /// Bare file name of the descriptor.
        file: String,
        /// Absolute path of the descriptor.
        fullpath: PathBuf,
    },
    /// A descriptor file was removed or renamed away.
    TorrentFileRemoved {
        /// Owning category.
        category: Category,
        /// Bare file name of the descriptor.
        file: String,
        /// Absolute path of the descriptor.
        fullpath: PathBuf,
    },
}
