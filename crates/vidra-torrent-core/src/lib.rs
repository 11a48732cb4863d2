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

//! Engine-agnostic torrent interfaces shared across the workspace.
//!
//! The BitTorrent machinery itself (peer wire, piece verification, DHT,
//! trackers) is an external collaborator behind the traits defined here; the
//! control plane only ever sees handles. The [`memory`] module provides an
//! in-process implementation used by the test suites and by local
//! development runs.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek};
use tokio::sync::broadcast;

pub mod error;
pub mod memory;
pub mod metainfo;

pub use error::{EngineError, EngineResult};
pub use metainfo::{InfoHash, Metainfo, MetainfoFile};

/// Swarm-level counters reported by the engine for one torrent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwarmStats {
    /// Peers currently connected that have the complete payload.
    pub connected_seeders: u32,
    /// Peers currently exchanging data.
    pub active_peers: u32,
    /// Payload bytes received and verified this session.
    pub bytes_read_useful: u64,
    /// Payload bytes sent to peers this session.
    pub bytes_written: u64,
}

/// One piece transitioning state inside the engine.
#[derive(Debug, Clone, Copy)]
pub struct PieceChange {
    /// Piece index within the torrent.
    pub index: u32,
    /// Whether the piece is now complete and verified.
    pub complete: bool,
}

/// A positioned byte reader over one file of a (possibly still downloading)
/// torrent. Reads block until the engine has the requested range.
pub trait TorrentReader: AsyncRead + AsyncSeek + Send + Unpin {
    /// Ask the engine to fetch ahead of the read position.
    fn set_readahead(&mut self, bytes: u64);

    /// Prefer latency over throughput for this reader (streaming playback).
    fn set_responsive(&mut self);
}

/// One file inside an engine-held torrent.
pub trait EngineFile: Send + Sync {
    /// Path of the file as a player would display it.
    fn display_path(&self) -> String;

    /// Size of the file in bytes.
    fn length(&self) -> u64;

    /// Open a new reader positioned at byte zero.
    fn reader(&self) -> Box<dyn TorrentReader>;
}

/// An engine-held torrent handle.
#[async_trait]
pub trait EngineTorrent: Send + Sync {
    /// Canonical identity of the torrent.
    fn info_hash(&self) -> InfoHash;

    /// Name from the metainfo (the payload's top-level name).
    fn name(&self) -> String;

    /// Total payload size in bytes.
    fn total_length(&self) -> u64;

    /// Verified bytes downloaded so far.
    fn bytes_completed(&self) -> u64;

    /// Bytes still missing; zero means complete.
    fn bytes_missing(&self) -> u64;

    /// Piece size from the metainfo.
    fn piece_length(&self) -> u64;

    /// BEP-27 private flag.
    fn is_private(&self) -> bool;

    /// Current swarm counters.
    fn stats(&self) -> SwarmStats;

    /// File handles in metainfo order.
    fn files(&self) -> Vec<Arc<dyn EngineFile>>;

    /// Cap concurrent peer connections; returns the previous cap.
    fn set_max_connections(&self, limit: u32) -> u32;

    /// Permit payload downloads.
    fn allow_data_download(&self);

    /// Forbid payload downloads (metadata exchange continues).
    fn disallow_data_download(&self);

    /// Schedule the whole payload for download.
    fn download_all(&self);

    /// Add tracker tiers beyond the ones in the metainfo.
    fn add_trackers(&self, tiers: &[Vec<String>]);

    /// Re-hash existing payload data against the piece list.
    fn verify_data(&self);

    /// Resolve once the metainfo (name, files, piece layout) is known.
    async fn wait_info(&self) -> anyhow::Result<()>;

    /// Subscribe to piece state changes. The channel closes when the torrent
    /// is removed or the engine shuts down.
    fn subscribe_piece_changes(&self) -> broadcast::Receiver<PieceChange>;

    /// Serialized metainfo suitable for writing a `.torrent` descriptor.
    ///
    /// # Errors
    ///
    /// Fails when the engine no longer holds the metainfo document.
    fn metainfo_bytes(&self) -> anyhow::Result<Vec<u8>>;
}

/// The engine singleton the control plane drives.
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Admit a torrent; payload lands under `download_dir`.
    async fn add_metainfo(
        &self,
        metainfo: &Metainfo,
        download_dir: &std::path::Path,
    ) -> anyhow::Result<Arc<dyn EngineTorrent>>;

    /// Remove a torrent from the engine. Payload files are left alone; the
    /// caller owns data deletion.
    async fn remove(&self, hash: &InfoHash) -> anyhow::Result<()>;

    /// Shut the engine down, closing every piece subscription.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Magnet-to-metainfo bootstrap seam.
///
/// Implementations run an isolated engine instance so transient torrents
/// used only for metadata resolution cannot interfere with the managed set.
#[async_trait]
pub trait MetainfoResolver: Send + Sync {
    /// Resolve a magnet URI into serialized metainfo bytes.
    async fn resolve_magnet(&self, uri: &str) -> anyhow::Result<Vec<u8>>;
}
