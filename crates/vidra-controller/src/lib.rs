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

//! Torrent lifecycle control plane.
//!
//! The [`TorrentPool`] owns the registry of managed torrents and reconciles
//! each record's declarative tag state against the engine every tick:
//! pausing, resuming, boosting connections for playback, and dropping
//! expired torrents. Streaming support (head/tail pre-fetch, leased file
//! readers) lives on the records themselves.

use std::time::Duration;

pub mod error;
pub mod info;
pub mod pool;
pub mod record;

pub use error::{ControllerError, ControllerResult};
pub use info::{TorrentFileInfo, TorrentInfo};
pub use pool::TorrentPool;
pub use record::{FileReaderLease, FileState, TorrentRecord, prepare_for_play, track_progress};

/// Pieces pre-fetched from the head of a file before playback.
pub const PIECES_FROM_START: u64 = 10;
/// Pieces pre-fetched from the tail of a file before playback.
pub const PIECES_FROM_END: u64 = 10;
/// Pieces of read-ahead requested on an open reader.
pub const READAHEAD_PIECES: u64 = 20;

/// Connection cap while a torrent is streamed or allowed to run hot.
pub const MAX_CONNS_ACTIVE: u32 = 200;
/// Connection cap for background torrents while something else streams.
pub const MAX_CONNS_BACKGROUND: u32 = 5;
/// Connection cap for a paused torrent.
pub const MAX_CONNS_PAUSED: u32 = 1;

/// Cadence of the reconciliation loop.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
/// How long a freshly written sidecar suppresses its own watcher echo.
pub const SIDECAR_ECHO_WINDOW: Duration = Duration::from_secs(4);

/// Seeding obligation granted to private (BEP-27) torrents.
pub const PRIVATE_SEED_DAYS: i64 = 21;
/// Grace period for `watch_later` torrents.
pub const WATCH_LATER_DAYS: i64 = 3;
/// Lifetime of torrents that arrived from the player and were never kept.
pub const KODI_EXPIRE_DAYS: i64 = 3;

/// Open trackers injected into public torrents on admission.
pub const PUBLIC_TRACKERS: &[&str] = &[
    "udp://tracker.opentrackr.org:1337/announce",
    "udp://open.stealth.si:80/announce",
    "udp://tracker.torrent.eu.org:451/announce",
];
