#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Category catalog and descriptor watcher.
//!
//! Watches a root directory whose immediate subdirectories are categories; a
//! category is ready once it carries a `downloads/` subdirectory. Descriptor
//! activity (`.torrent`, `.magnet`, `.tags.yaml`) inside ready categories is
//! normalized into [`WatchEvent`]s on one bounded channel, with a 2-second
//! per-path debounce collapsing the write bursts of atomic saves.

use std::path::Path;

pub mod error;
pub mod events;
pub mod watcher;

pub use error::{WatchError, WatchResult};
pub use events::{Category, WatchEvent};
pub use watcher::CategoryWatcher;

/// Debounce window applied to descriptor writes.
pub const WRITE_SETTLE: std::time::Duration = std::time::Duration::from_secs(2);

/// Whether a path names a descriptor this system manages.
///
/// Hidden names are never descriptors; only the three known suffixes count.
#[must_use]
pub fn is_descriptor(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    if name.starts_with('.') {
        return false;
    }
    name.ends_with(".torrent") || name.ends_with(".magnet") || name.ends_with(".yaml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn descriptor_suffixes() {
        assert!(is_descriptor(&PathBuf::from("/t/video/a.torrent")));
        assert!(is_descriptor(&PathBuf::from("/t/video/a.magnet")));
        assert!(is_descriptor(&PathBuf::from("/t/video/a.torrent.tags.yaml")));
        assert!(!is_descriptor(&PathBuf::from("/t/video/a.txt")));
        assert!(!is_descriptor(&PathBuf::from("/t/video/.hidden.torrent")));
        assert!(!is_descriptor(&PathBuf::from("/t/video/a.torrent.tmp")));
    }
}
