//! Managed torrent records and per-file streaming state.

use std::fmt;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, ReadBuf, SeekFrom};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};
use vidra_tags::{TagValue, Tags};
use vidra_torrent_core::{EngineFile, EngineTorrent, TorrentReader};

use crate::info::{TorrentFileInfo, TorrentInfo};
use crate::{
    MAX_CONNS_ACTIVE, MAX_CONNS_PAUSED, PIECES_FROM_END, PIECES_FROM_START, READAHEAD_PIECES,
};

/// One torrent under management.
///
/// Mutable state uses atomics and short-lived internal locks so HTTP
/// handlers can observe records without holding the registry mutex; the
/// reconciliation loop remains the only writer of consequence.
pub struct TorrentRecord {
    name: String,
    category: String,
    slot: AtomicUsize,
    tags: Mutex<Tags>,
    handle: OnceLock<Arc<dyn EngineTorrent>>,
    files: OnceLock<Vec<Arc<FileState>>>,
    info_ready: AtomicBool,
    paused: AtomicBool,
    force_download: AtomicBool,
    dead: AtomicBool,
    dl_rate: AtomicI64,
    unpaused_at: Mutex<Option<DateTime<Utc>>>,
    unpaused_downloaded: AtomicU64,
    initial_totals: OnceLock<(i64, i64)>,
    suppress_reload_until: Mutex<Option<DateTime<Utc>>>,
}

impl fmt::Debug for TorrentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TorrentRecord")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

impl TorrentRecord {
    /// Create a record carrying its seed tags; the engine handle attaches
    /// once metadata arrives.
    #[must_use]
    pub fn new(name: impl Into<String>, category: impl Into<String>, tags: Tags) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            category: category.into(),
            slot: AtomicUsize::new(0),
            tags: Mutex::new(tags),
            handle: OnceLock::new(),
            files: OnceLock::new(),
            info_ready: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            force_download: AtomicBool::new(false),
            dead: AtomicBool::new(false),
            dl_rate: AtomicI64::new(0),
            unpaused_at: Mutex::new(None),
            unpaused_downloaded: AtomicU64::new(0),
            initial_totals: OnceLock::new(),
            suppress_reload_until: Mutex::new(None),
        })
    }

    /// Display name the record was created under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Category the record belongs to.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Registry slot currently holding this record.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot.load(Ordering::Relaxed)
    }

    pub(crate) fn set_slot(&self, slot: usize) {
        self.slot.store(slot, Ordering::Relaxed);
    }

    /// Whether engine metadata has arrived.
    #[must_use]
    pub fn info_ready(&self) -> bool {
        self.info_ready.load(Ordering::Relaxed)
    }

    /// Whether the record is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Whether the record was dropped and awaits slot reaping.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Relaxed)
    }

    pub(crate) fn set_dead(&self) {
        self.dead.store(true, Ordering::Relaxed);
    }

    /// Whether the user pinned this torrent to keep downloading.
    #[must_use]
    pub fn force_download(&self) -> bool {
        self.force_download.load(Ordering::Relaxed)
    }

    pub(crate) fn sync_force_download(&self, value: bool) {
        self.force_download.store(value, Ordering::Relaxed);
    }

    /// Last measured download rate in bytes per second.
    #[must_use]
    pub fn download_rate(&self) -> i64 {
        self.dl_rate.load(Ordering::Relaxed)
    }

    /// Run `op` against the tag map under its lock.
    pub fn with_tags<R>(&self, op: impl FnOnce(&mut Tags) -> R) -> R {
        op(&mut self.lock_tags())
    }

    /// Clone the tag map for unlocked observers.
    #[must_use]
    pub fn tags_snapshot(&self) -> Tags {
        self.lock_tags().clone()
    }

    fn lock_tags(&self) -> MutexGuard<'_, Tags> {
        match self.tags.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!(name = %self.name, "tag mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    /// The engine handle, once metadata has arrived.
    #[must_use]
    pub fn engine_handle(&self) -> Option<Arc<dyn EngineTorrent>> {
        self.handle.get().cloned()
    }

    pub(crate) fn attach(&self, handle: Arc<dyn EngineTorrent>, files: Vec<Arc<FileState>>) {
        let _ = self.handle.set(handle);
        let _ = self.files.set(files);
        self.info_ready.store(true, Ordering::Relaxed);
    }

    /// File states, empty until metadata arrives.
    #[must_use]
    pub fn files(&self) -> Vec<Arc<FileState>> {
        self.files.get().cloned().unwrap_or_default()
    }

    /// Find a file by its display path.
    #[must_use]
    pub fn file_by_name(&self, name: &str) -> Option<Arc<FileState>> {
        self.files()
            .into_iter()
            .find(|file| file.display_path() == name)
    }

    /// Find a file by metainfo index.
    #[must_use]
    pub fn file_by_index(&self, index: usize) -> Option<Arc<FileState>> {
        self.files().get(index).cloned()
    }

    /// Open readers across all files.
    #[must_use]
    pub fn active_readers(&self) -> usize {
        self.files().iter().map(|file| file.readers_open()).sum()
    }

    /// Whether any file has an open reader.
    #[must_use]
    pub fn in_play(&self) -> bool {
        self.active_readers() > 0
    }

    /// Whether the payload is fully downloaded.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.engine_handle()
            .is_some_and(|handle| handle.bytes_missing() == 0)
    }

    /// Download completion percentage (0-100); zero before metadata.
    #[must_use]
    pub fn completion(&self) -> i64 {
        let Some(handle) = self.engine_handle() else {
            return 0;
        };
        let total = handle.total_length();
        if total == 0 {
            return 0;
        }
        i64::try_from(handle.bytes_completed().saturating_mul(100) / total).unwrap_or(0)
    }

    /// Stop data download. No-op while playing or already paused.
    pub fn pause(&self, reason: &str) {
        if self.in_play() || self.paused.load(Ordering::Relaxed) {
            return;
        }
        debug!(name = %self.name, reason, "pausing");
        if let Some(handle) = self.engine_handle() {
            handle.disallow_data_download();
            handle.set_max_connections(MAX_CONNS_PAUSED);
        }
        self.paused.store(true, Ordering::Relaxed);
        self.with_tags(|tags| {
            tags.set("paused", "yes");
            if !reason.is_empty() {
                tags.set("pause_reason", reason);
            }
            tags.remove("resume_reason");
        });
    }

    /// Start or continue downloading. No-op unless paused.
    pub fn resume(&self, reason: &str) {
        if !self.paused.load(Ordering::Relaxed) {
            return;
        }
        debug!(name = %self.name, reason, "resuming");
        if let Some(handle) = self.engine_handle() {
            handle.allow_data_download();
            handle.download_all();
            self.unpaused_downloaded
                .store(handle.bytes_completed(), Ordering::Relaxed);
        }
        *self.lock_unpaused() = Some(Utc::now());
        self.paused.store(false, Ordering::Relaxed);
        self.with_tags(|tags| {
            tags.remove("paused");
            tags.remove("pause_reason");
            tags.set("resume_reason", reason);
        });
    }

    fn lock_unpaused(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        match self.unpaused_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Timestamp of the last resume, if any.
    #[must_use]
    pub fn unpaused_at(&self) -> Option<DateTime<Utc>> {
        *self.lock_unpaused()
    }

    /// Byte counter captured at the last resume.
    #[must_use]
    pub fn unpaused_downloaded(&self) -> u64 {
        self.unpaused_downloaded.load(Ordering::Relaxed)
    }

    pub(crate) fn set_download_rate(&self, rate: i64) {
        self.dl_rate.store(rate, Ordering::Relaxed);
    }

    pub(crate) fn initial_totals(&self, tags: &Tags) -> (i64, i64) {
        *self.initial_totals.get_or_init(|| {
            (
                tags.get_int("downloaded_bytes", 0),
                tags.get_int("upload_bytes", 0),
            )
        })
    }

    /// Whether this torrent may be deleted right now.
    ///
    /// Playback always wins; `force_delete` overrides the seeding obligation;
    /// an unparseable `seed_until` keeps the torrent (safe-keep).
    #[must_use]
    pub fn can_delete(&self) -> bool {
        if self.in_play() {
            trace!(name = %self.name, "cannot drop, still in play");
            return false;
        }
        let verdict = self.with_tags(|tags| {
            if tags.flag("force_delete") {
                return true;
            }
            match tags.get("seed_until") {
                None => true,
                Some(raw) => match raw.as_time() {
                    None => {
                        warn!(name = %self.name, value = %raw, "seed_until unparseable, keeping");
                        false
                    }
                    Some(deadline) => deadline <= Utc::now(),
                },
            }
        });
        if verdict {
            trace!(name = %self.name, "eligible for deletion");
        }
        verdict
    }

    pub(crate) fn set_reload_suppression(&self, until: DateTime<Utc>) {
        let guard = self.suppress_reload_until.lock();
        match guard {
            Ok(mut slot) => *slot = Some(until),
            Err(poisoned) => *poisoned.into_inner() = Some(until),
        }
    }

    /// Whether a sidecar reload should be skipped as a self-write echo.
    #[must_use]
    pub fn reload_suppressed(&self, now: DateTime<Utc>) -> bool {
        let guard = match self.suppress_reload_until.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.is_some_and(|until| now < until)
    }

    /// Persist the tag map when dirty; IO failures are logged and skipped.
    pub fn save_tags(&self) {
        let mut tags = self.lock_tags();
        if tags.validated() {
            trace!(name = %self.name, "tags already saved, no changes");
            return;
        }
        tags.validate();
        let pathname = tags.get_str("tags_fullpath", "");
        if pathname.is_empty() {
            error!(name = %self.name, "tags_fullpath is empty, cannot save sidecar");
            return;
        }
        if let Err(err) = tags.save_to(Path::new(&pathname)) {
            error!(name = %self.name, error = %err, "failed to save sidecar");
        }
    }

    /// Write the canonical `.torrent` descriptor when it is absent.
    pub fn save_torrent_file(&self) {
        let Some(handle) = self.engine_handle() else {
            return;
        };
        let (pathname, needed) = self.with_tags(|tags| {
            let pathname = tags.get_str("fullpath", "");
            let needed = !tags.flag("torrent_saved") || !Path::new(&pathname).is_file();
            (pathname, needed)
        });
        if pathname.is_empty() {
            error!(name = %self.name, "fullpath is empty, cannot save torrent file");
            return;
        }
        if !needed {
            return;
        }
        match handle.metainfo_bytes() {
            Ok(bytes) => {
                if let Err(err) = std::fs::write(&pathname, bytes) {
                    error!(name = %self.name, error = %err, "failed to write torrent file");
                } else {
                    self.with_tags(|tags| tags.set_if_new("torrent_saved", "yes"));
                }
            }
            Err(err) => error!(name = %self.name, error = %err, "metainfo unavailable"),
        }
    }

    /// Build a wire snapshot of the record.
    #[must_use]
    pub fn torrent_info(&self) -> TorrentInfo {
        let Some(handle) = self.engine_handle() else {
            return TorrentInfo {
                name: self.name.clone(),
                tags: self.tags_snapshot(),
                ..TorrentInfo::default()
            };
        };
        let stats = handle.stats();
        let files: Vec<TorrentFileInfo> = self.files().iter().map(|file| file.info()).collect();
        TorrentInfo {
            name: handle.name(),
            size: handle.total_length(),
            files_count: files.len(),
            files,
            seeders: stats.connected_seeders,
            leechers: stats.active_peers,
            completed: handle.bytes_missing() == 0,
            completion: self.completion(),
            bytes_downloaded: stats.bytes_read_useful,
            bytes_uploaded: stats.bytes_written,
            paused: self.is_paused(),
            open_plays: self.active_readers(),
            tags: self.tags_snapshot(),
            download_rate: self.download_rate(),
        }
    }
}

/// Streaming state for one file of a managed torrent.
pub struct FileState {
    file: Arc<dyn EngineFile>,
    piece_length: u64,
    bytes_want: u64,
    bytes_have: AtomicU64,
    preparing: AtomicBool,
    readers_open: AtomicUsize,
}

impl FileState {
    /// Wrap an engine file with the default head+tail pre-fetch budget.
    #[must_use]
    pub fn new(file: Arc<dyn EngineFile>, piece_length: u64) -> Arc<Self> {
        Arc::new(Self {
            file,
            piece_length,
            bytes_want: piece_length * (PIECES_FROM_START + PIECES_FROM_END),
            bytes_have: AtomicU64::new(0),
            preparing: AtomicBool::new(false),
            readers_open: AtomicUsize::new(0),
        })
    }

    /// Display path of the underlying file.
    #[must_use]
    pub fn display_path(&self) -> String {
        self.file.display_path()
    }

    /// File size in bytes.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.file.length()
    }

    /// Pre-fetch budget in bytes.
    #[must_use]
    pub fn bytes_want(&self) -> u64 {
        self.bytes_want
    }

    /// Pre-fetched bytes so far.
    #[must_use]
    pub fn bytes_have(&self) -> u64 {
        self.bytes_have.load(Ordering::Relaxed)
    }

    /// Whether the pre-fetch budget is satisfied.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.bytes_have() >= self.bytes_want
    }

    /// Open readers on this file.
    #[must_use]
    pub fn readers_open(&self) -> usize {
        self.readers_open.load(Ordering::Relaxed)
    }

    /// Per-file wire snapshot.
    #[must_use]
    pub fn info(&self) -> TorrentFileInfo {
        TorrentFileInfo {
            name: self.display_path(),
            size: self.length(),
            ready: self.ready(),
            bytes_want: self.bytes_want,
            bytes_have: self.bytes_have(),
        }
    }

    /// Open a leased reader at byte zero, resuming the owning torrent and
    /// boosting its connection cap for playback.
    #[must_use]
    pub fn open_reader(self: &Arc<Self>, record: &TorrentRecord) -> FileReaderLease {
        record.resume("reader opened");
        let open = self.readers_open.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(handle) = record.engine_handle() {
            handle.set_max_connections(MAX_CONNS_ACTIVE);
        }
        let mut reader = self.file.reader();
        reader.set_readahead(self.piece_length * READAHEAD_PIECES);
        reader.set_responsive();
        info!(file = %self.display_path(), active = open, "file reader opened");
        FileReaderLease {
            file: self.clone(),
            reader,
        }
    }
}

/// A reader plus its open-count lease; dropping the lease closes the reader
/// and releases the count on every exit path.
pub struct FileReaderLease {
    file: Arc<FileState>,
    reader: Box<dyn TorrentReader>,
}

impl Drop for FileReaderLease {
    fn drop(&mut self) {
        let open = self.file.readers_open.fetch_sub(1, Ordering::SeqCst) - 1;
        info!(file = %self.file.display_path(), active = open, "file reader closed");
    }
}

impl AsyncRead for FileReaderLease {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl AsyncSeek for FileReaderLease {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.reader).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.reader).poll_complete(cx)
    }
}

/// Pre-fetch the head and tail of a file so a player can start and seek.
///
/// Idempotent while a preparation is already running and a no-op once the
/// budget is satisfied. Files shorter than the budget terminate through EOF
/// and are still marked ready.
pub async fn prepare_for_play(record: Arc<TorrentRecord>, file: Arc<FileState>) {
    if file.ready() {
        return;
    }
    if file.preparing.swap(true, Ordering::SeqCst) {
        return;
    }

    record.resume("prepare for play");
    let mut lease = file.open_reader(&record);

    let tail = file.piece_length * PIECES_FROM_END;
    debug!(file = %file.display_path(), bytes = tail, "reading tail");
    match i64::try_from(tail) {
        Ok(offset) => {
            if let Err(err) = lease.seek(SeekFrom::End(-offset)).await {
                warn!(error = %err, "tail seek failed, reading from current position");
            }
            read_into_budget(&mut lease, &file, tail).await;
        }
        Err(_) => warn!(file = %file.display_path(), "tail budget exceeds seekable range"),
    }

    let head = file.piece_length * PIECES_FROM_START;
    debug!(file = %file.display_path(), bytes = head, "reading head");
    if let Err(err) = lease.seek(SeekFrom::Start(0)).await {
        warn!(error = %err, "head seek failed, reading from current position");
    }
    read_into_budget(&mut lease, &file, head).await;

    file.bytes_have.store(file.bytes_want, Ordering::Relaxed);
    file.preparing.store(false, Ordering::SeqCst);
    drop(lease);
    info!(file = %file.display_path(), "prepared for play");
}

async fn read_into_budget(lease: &mut FileReaderLease, file: &FileState, budget: u64) {
    let mut buf = vec![0_u8; 64 * 1024];
    let mut done = 0_u64;
    while done < budget {
        match lease.read(&mut buf).await {
            Ok(0) => break,
            Ok(count) => {
                done += count as u64;
                file.bytes_have.fetch_add(count as u64, Ordering::Relaxed);
                trace!(file = %file.display_path(), read = done, left = budget - done, "pre-fetch progress");
            }
            Err(err) => {
                error!(file = %file.display_path(), error = %err, "pre-fetch read failed");
                break;
            }
        }
    }
}

/// Follow piece completions for one torrent, maintaining its download-rate
/// metrics and recording the completion milestone. Exits when the torrent
/// completes, is dropped, or the engine shuts down.
pub async fn track_progress(record: Arc<TorrentRecord>) {
    if record.completed() {
        trace!(name = %record.name(), "already completed, not tracking");
        return;
    }
    let Some(handle) = record.engine_handle() else {
        return;
    };
    let mut changes = handle.subscribe_piece_changes();
    trace!(name = %record.name(), "tracking piece completions");

    loop {
        let was_completed = record.completed();
        let change = match changes.recv().await {
            Ok(change) => change,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                trace!(name = %record.name(), skipped, "piece stream lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(name = %record.name(), "piece stream closed, tracker exiting");
                return;
            }
        };

        if change.complete {
            if let Some(unpaused) = record.unpaused_at() {
                let elapsed = (Utc::now() - unpaused).num_milliseconds();
                if elapsed > 0 {
                    let fresh =
                        handle.bytes_completed().saturating_sub(record.unpaused_downloaded());
                    let rate = i64::try_from(fresh).unwrap_or(i64::MAX) * 1000 / elapsed;
                    record.set_download_rate(rate);
                }
            }
            let seeders = i64::from(handle.stats().connected_seeders);
            let rate = record.download_rate();
            record.with_tags(|tags| {
                if rate > tags.get_int("max_rate", 0) {
                    tags.set("max_rate", rate);
                }
                if seeders > tags.get_int("max_seeders", 0) {
                    tags.set("max_seeders", seeders);
                }
            });
        }

        if !was_completed && record.completed() {
            let now = Utc::now();
            let rate = record.download_rate();
            record.with_tags(|tags| {
                let added = tags.get_time("added").unwrap_or(now);
                let total_time = (now - added).num_seconds();
                // Overwrites the derived yes/no marker with the milestone
                // timestamp; later ticks leave timestamps alone.
                tags.set("completed", TagValue::time(now));
                tags.set_if_new("total_time", total_time);
                tags.set_if_new("last_rate", rate);
            });
            info!(name = %record.name(), rate, "download completed");
            return;
        }
    }
}
