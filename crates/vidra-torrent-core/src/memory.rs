//! In-process engine implementation.
//!
//! Backs the test suites and local development runs: torrents are held in a
//! map, payload bytes come from an optional seeded buffer (zeros otherwise),
//! and piece events are driven explicitly. Production deployments link an
//! adapter over a real BitTorrent stack implementing the same traits.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::task::{Context, Poll};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf, SeekFrom};
use tokio::sync::broadcast;
use tracing::debug;

use crate::metainfo::{InfoHash, Metainfo};
use crate::{
    EngineFile, EngineTorrent, MetainfoResolver, PieceChange, SwarmStats, TorrentEngine,
    TorrentReader,
};

const PIECE_EVENT_CAPACITY: usize = 256;

/// In-memory engine; see the module docs.
#[derive(Default)]
pub struct MemoryEngine {
    torrents: Mutex<HashMap<InfoHash, Arc<MemoryTorrent>>>,
}

impl MemoryEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a torrent by infohash (test hook).
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn get(&self, hash: &InfoHash) -> Option<Arc<MemoryTorrent>> {
        self.torrents.lock().unwrap().get(hash).cloned()
    }

    /// Number of torrents currently held.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.torrents.lock().unwrap().len()
    }

    /// Whether the engine holds no torrents.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.torrents.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl TorrentEngine for MemoryEngine {
    async fn add_metainfo(
        &self,
        metainfo: &Metainfo,
        download_dir: &Path,
    ) -> Result<Arc<dyn EngineTorrent>> {
        let hash = metainfo.info_hash();
        let mut torrents = self.torrents.lock().unwrap();
        if let Some(existing) = torrents.get(&hash) {
            return Ok(existing.clone());
        }
        let torrent = MemoryTorrent::from_metainfo(metainfo, download_dir);
        torrents.insert(hash.clone(), torrent.clone());
        debug!(info_hash = %hash, name = metainfo.name(), "torrent admitted");
        Ok(torrent)
    }

    async fn remove(&self, hash: &InfoHash) -> Result<()> {
        let removed = self.torrents.lock().unwrap().remove(hash);
        match removed {
            Some(torrent) => {
                torrent.close_subscriptions();
                Ok(())
            }
            None => Err(anyhow!("unknown torrent {hash}")),
        }
    }

    async fn close(&self) -> Result<()> {
        let drained: Vec<_> = self.torrents.lock().unwrap().drain().collect();
        for (_, torrent) in drained {
            torrent.close_subscriptions();
        }
        Ok(())
    }
}

struct FileSpan {
    display_path: String,
    offset: u64,
    length: u64,
}

/// One torrent held by the [`MemoryEngine`].
pub struct MemoryTorrent {
    self_ref: Weak<Self>,
    hash: InfoHash,
    name: String,
    piece_length: u64,
    total_length: u64,
    private: bool,
    raw: Vec<u8>,
    download_dir: PathBuf,
    spans: Vec<FileSpan>,
    content: RwLock<Option<Arc<Vec<u8>>>>,
    bytes_completed: AtomicU64,
    stats: Mutex<SwarmStats>,
    max_connections: AtomicU32,
    allow_download: AtomicBool,
    download_all: AtomicBool,
    verify_requested: AtomicBool,
    extra_trackers: Mutex<Vec<Vec<String>>>,
    piece_tx: Mutex<Option<broadcast::Sender<PieceChange>>>,
}

impl MemoryTorrent {
    fn from_metainfo(metainfo: &Metainfo, download_dir: &Path) -> Arc<Self> {
        let mut offset = 0;
        let spans = metainfo
            .files()
            .into_iter()
            .map(|file| {
                let span = FileSpan {
                    display_path: file.display_path,
                    offset,
                    length: file.length,
                };
                offset += file.length;
                span
            })
            .collect();
        let (piece_tx, _) = broadcast::channel(PIECE_EVENT_CAPACITY);
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            hash: metainfo.info_hash(),
            name: metainfo.name().to_string(),
            piece_length: metainfo.piece_length(),
            total_length: metainfo.total_length(),
            private: metainfo.is_private(),
            raw: metainfo.raw_bytes().to_vec(),
            download_dir: download_dir.to_path_buf(),
            spans,
            content: RwLock::new(None),
            bytes_completed: AtomicU64::new(0),
            stats: Mutex::new(SwarmStats::default()),
            max_connections: AtomicU32::new(u32::MAX),
            allow_download: AtomicBool::new(true),
            download_all: AtomicBool::new(false),
            verify_requested: AtomicBool::new(false),
            extra_trackers: Mutex::new(Vec::new()),
            piece_tx: Mutex::new(Some(piece_tx)),
        })
    }

    fn close_subscriptions(&self) {
        self.piece_tx.lock().unwrap().take();
    }

    /// Directory the engine was told to place the payload under.
    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Provide the payload bytes readers should serve (test hook).
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn seed_content(&self, content: Vec<u8>) {
        *self.content.write().unwrap() = Some(Arc::new(content));
    }

    /// Override the completed-byte counter (test hook).
    pub fn set_bytes_completed(&self, bytes: u64) {
        self.bytes_completed.store(bytes, Ordering::Relaxed);
    }

    /// Override the swarm counters (test hook).
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn set_stats(&self, stats: SwarmStats) {
        *self.stats.lock().unwrap() = stats;
    }

    /// Emit a piece state change to subscribers (test hook).
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn emit_piece(&self, index: u32, complete: bool) {
        if let Some(sender) = self.piece_tx.lock().unwrap().as_ref() {
            let _ = sender.send(PieceChange { index, complete });
        }
    }

    /// Current connection cap, as last applied by the control plane.
    #[must_use]
    pub fn max_connections(&self) -> u32 {
        self.max_connections.load(Ordering::Relaxed)
    }

    /// Whether payload downloads are currently permitted.
    #[must_use]
    pub fn data_download_allowed(&self) -> bool {
        self.allow_download.load(Ordering::Relaxed)
    }

    /// Whether a full download was scheduled.
    #[must_use]
    pub fn download_all_requested(&self) -> bool {
        self.download_all.load(Ordering::Relaxed)
    }

    /// Whether a data re-verification was requested.
    #[must_use]
    pub fn data_verify_requested(&self) -> bool {
        self.verify_requested.load(Ordering::Relaxed)
    }

    /// Tracker tiers injected on top of the metainfo ones.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn extra_trackers(&self) -> Vec<Vec<String>> {
        self.extra_trackers.lock().unwrap().clone()
    }

    fn content_snapshot(&self) -> Option<Arc<Vec<u8>>> {
        self.content.read().unwrap().clone()
    }
}

#[async_trait]
impl EngineTorrent for MemoryTorrent {
    fn info_hash(&self) -> InfoHash {
        self.hash.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn total_length(&self) -> u64 {
        self.total_length
    }

    fn bytes_completed(&self) -> u64 {
        self.bytes_completed.load(Ordering::Relaxed)
    }

    fn bytes_missing(&self) -> u64 {
        self.total_length
            .saturating_sub(self.bytes_completed.load(Ordering::Relaxed))
    }

    fn piece_length(&self) -> u64 {
        self.piece_length
    }

    fn is_private(&self) -> bool {
        self.private
    }

    fn stats(&self) -> SwarmStats {
        *self.stats.lock().unwrap()
    }

    fn files(&self) -> Vec<Arc<dyn EngineFile>> {
        let Some(torrent) = self.self_ref.upgrade() else {
            return Vec::new();
        };
        (0..self.spans.len())
            .map(|index| {
                Arc::new(MemoryFile {
                    torrent: torrent.clone(),
                    index,
                }) as Arc<dyn EngineFile>
            })
            .collect()
    }

    fn set_max_connections(&self, limit: u32) -> u32 {
        self.max_connections.swap(limit, Ordering::Relaxed)
    }

    fn allow_data_download(&self) {
        self.allow_download.store(true, Ordering::Relaxed);
    }

    fn disallow_data_download(&self) {
        self.allow_download.store(false, Ordering::Relaxed);
    }

    fn download_all(&self) {
        self.download_all.store(true, Ordering::Relaxed);
    }

    fn add_trackers(&self, tiers: &[Vec<String>]) {
        self.extra_trackers
            .lock()
            .unwrap()
            .extend(tiers.iter().cloned());
    }

    fn verify_data(&self) {
        self.verify_requested.store(true, Ordering::Relaxed);
    }

    async fn wait_info(&self) -> Result<()> {
        // Metainfo arrives fully parsed; nothing to wait for in memory.
        Ok(())
    }

    fn subscribe_piece_changes(&self) -> broadcast::Receiver<PieceChange> {
        let guard = self.piece_tx.lock().unwrap();
        guard.as_ref().map_or_else(
            || {
                let (sender, receiver) = broadcast::channel(1);
                drop(sender);
                receiver
            },
            broadcast::Sender::subscribe,
        )
    }

    fn metainfo_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.raw.clone())
    }
}

struct MemoryFile {
    torrent: Arc<MemoryTorrent>,
    index: usize,
}

impl EngineFile for MemoryFile {
    fn display_path(&self) -> String {
        self.torrent.spans[self.index].display_path.clone()
    }

    fn length(&self) -> u64 {
        self.torrent.spans[self.index].length
    }

    fn reader(&self) -> Box<dyn TorrentReader> {
        let span = &self.torrent.spans[self.index];
        Box::new(MemoryReader {
            torrent: self.torrent.clone(),
            offset: span.offset,
            length: span.length,
            pos: 0,
            readahead: 0,
            responsive: false,
        })
    }
}

struct MemoryReader {
    torrent: Arc<MemoryTorrent>,
    offset: u64,
    length: u64,
    pos: u64,
    // Tuning knobs accepted for interface parity; reads complete instantly
    // here so neither changes behaviour.
    #[allow(dead_code)]
    readahead: u64,
    #[allow(dead_code)]
    responsive: bool,
}

impl TorrentReader for MemoryReader {
    fn set_readahead(&mut self, bytes: u64) {
        self.readahead = bytes;
    }

    fn set_responsive(&mut self) {
        self.responsive = true;
    }
}

impl AsyncRead for MemoryReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pos >= self.length {
            return Poll::Ready(Ok(()));
        }
        let remaining = usize::try_from(self.length - self.pos).unwrap_or(usize::MAX);
        let take = buf.remaining().min(remaining);
        let absolute = usize::try_from(self.offset + self.pos).unwrap_or(usize::MAX);
        match self.torrent.content_snapshot() {
            Some(content) => {
                let end = (absolute + take).min(content.len());
                if absolute < end {
                    buf.put_slice(&content[absolute..end]);
                    let copied = end - absolute;
                    self.pos += copied as u64;
                } else {
                    // Past the seeded buffer: behave like sparse zeros.
                    buf.put_slice(&vec![0; take]);
                    self.pos += take as u64;
                }
            }
            None => {
                buf.put_slice(&vec![0; take]);
                self.pos += take as u64;
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for MemoryReader {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let target = match position {
            SeekFrom::Start(at) => i128::from(at),
            SeekFrom::End(delta) => i128::from(self.length) + i128::from(delta),
            SeekFrom::Current(delta) => i128::from(self.pos) + i128::from(delta),
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = u64::try_from(target).unwrap_or(u64::MAX);
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.pos))
    }
}

/// Resolver over a registry of known magnets.
///
/// The in-memory stand-in for the isolated bootstrap engine: tests register
/// magnet URIs up front; anything else fails the way an offline bootstrap
/// would.
#[derive(Default)]
pub struct MemoryResolver {
    known: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register metainfo bytes for a magnet URI (test hook).
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn register(&self, uri: impl Into<String>, metainfo: Vec<u8>) {
        self.known.lock().unwrap().insert(uri.into(), metainfo);
    }
}

#[async_trait]
impl MetainfoResolver for MemoryResolver {
    async fn resolve_magnet(&self, uri: &str) -> Result<Vec<u8>> {
        self.known
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| anyhow!("no metadata source for magnet {uri}"))
    }
}

/// Build valid single- or multi-file metainfo bytes for tests and fixtures.
///
/// Multi-file payloads name their entries `file0.bin`, `file1.bin`, ...
#[must_use]
pub fn test_metainfo_bytes(
    name: &str,
    piece_length: u64,
    file_lengths: &[u64],
    private: bool,
) -> Vec<u8> {
    fn push_str(out: &mut Vec<u8>, value: &str) {
        out.extend_from_slice(format!("{}:{}", value.len(), value).as_bytes());
    }
    fn push_int(out: &mut Vec<u8>, key: &str, value: u64) {
        push_str(out, key);
        out.extend_from_slice(format!("i{value}e").as_bytes());
    }

    let total: u64 = file_lengths.iter().sum();
    let piece_count = total.div_ceil(piece_length).max(1);
    let pieces: Vec<u8> = (0..piece_count * 20)
        .map(|i| u8::try_from(i % 251).unwrap_or(0))
        .collect();

    let mut out = Vec::new();
    out.push(b'd');
    push_str(&mut out, "announce");
    push_str(&mut out, "http://tracker.invalid/announce");
    push_str(&mut out, "info");
    out.push(b'd');
    if let [single] = file_lengths {
        push_int(&mut out, "length", *single);
    } else {
        push_str(&mut out, "files");
        out.push(b'l');
        for (index, length) in file_lengths.iter().enumerate() {
            out.push(b'd');
            push_int(&mut out, "length", *length);
            push_str(&mut out, "path");
            out.push(b'l');
            push_str(&mut out, &format!("file{index}.bin"));
            out.push(b'e');
            out.push(b'e');
        }
        out.push(b'e');
    }
    push_str(&mut out, "name");
    push_str(&mut out, name);
    push_int(&mut out, "piece length", piece_length);
    push_str(&mut out, "pieces");
    out.extend_from_slice(format!("{}:", pieces.len()).as_bytes());
    out.extend_from_slice(&pieces);
    if private {
        push_int(&mut out, "private", 1);
    }
    out.push(b'e');
    out.push(b'e');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    fn parsed(name: &str, piece_length: u64, files: &[u64]) -> Metainfo {
        Metainfo::parse(&test_metainfo_bytes(name, piece_length, files, false)).expect("parse")
    }

    #[tokio::test]
    async fn add_is_idempotent_by_hash() {
        let engine = MemoryEngine::new();
        let meta = parsed("demo", 16_384, &[32_768]);
        let first = engine
            .add_metainfo(&meta, Path::new("/dl"))
            .await
            .expect("add");
        let second = engine
            .add_metainfo(&meta, Path::new("/dl"))
            .await
            .expect("add again");
        assert_eq!(first.info_hash(), second.info_hash());
        assert_eq!(engine.len(), 1);
    }

    #[tokio::test]
    async fn remove_closes_piece_subscriptions() {
        let engine = MemoryEngine::new();
        let meta = parsed("demo", 16_384, &[32_768]);
        let handle = engine
            .add_metainfo(&meta, Path::new("/dl"))
            .await
            .expect("add");
        let mut receiver = handle.subscribe_piece_changes();
        engine.remove(&handle.info_hash()).await.expect("remove");
        assert!(matches!(
            receiver.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn reader_serves_seeded_content_with_seeks() {
        let engine = MemoryEngine::new();
        let meta = parsed("demo", 16, &[64]);
        let handle = engine
            .add_metainfo(&meta, Path::new("/dl"))
            .await
            .expect("add");
        let backing = engine.get(&handle.info_hash()).expect("torrent");
        backing.seed_content((0..64).collect());

        let files = handle.files();
        let mut reader = files[0].reader();
        let mut buf = [0_u8; 8];
        reader.read_exact(&mut buf).await.expect("head read");
        assert_eq!(buf, [0, 1, 2, 3, 4, 5, 6, 7]);

        reader.seek(SeekFrom::End(-8)).await.expect("tail seek");
        reader.read_exact(&mut buf).await.expect("tail read");
        assert_eq!(buf, [56, 57, 58, 59, 60, 61, 62, 63]);

        let consumed = reader.read(&mut buf).await.expect("eof read");
        assert_eq!(consumed, 0, "reads at the end signal EOF");
    }

    #[tokio::test]
    async fn seek_before_start_is_rejected() {
        let engine = MemoryEngine::new();
        let meta = parsed("tiny", 16, &[8]);
        let handle = engine
            .add_metainfo(&meta, Path::new("/dl"))
            .await
            .expect("add");
        let files = handle.files();
        let mut reader = files[0].reader();
        let err = reader
            .seek(SeekFrom::End(-64))
            .await
            .expect_err("negative offset");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn unseeded_content_reads_as_zeros() {
        let engine = MemoryEngine::new();
        let meta = parsed("fresh", 16, &[32]);
        let handle = engine
            .add_metainfo(&meta, Path::new("/dl"))
            .await
            .expect("add");
        let files = handle.files();
        let mut reader = files[0].reader();
        let mut all = Vec::new();
        reader.read_to_end(&mut all).await.expect("read");
        assert_eq!(all, vec![0; 32]);
    }

    #[tokio::test]
    async fn multi_file_spans_partition_the_payload() {
        let engine = MemoryEngine::new();
        let meta = parsed("pack", 16, &[24, 40]);
        let handle = engine
            .add_metainfo(&meta, Path::new("/dl"))
            .await
            .expect("add");
        let backing = engine.get(&handle.info_hash()).expect("torrent");
        backing.seed_content((0..64).collect());

        let files = handle.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].length(), 40);

        let mut reader = files[1].reader();
        let mut buf = [0_u8; 4];
        reader.read_exact(&mut buf).await.expect("read");
        assert_eq!(buf, [24, 25, 26, 27], "second file starts past the first");
    }

    #[tokio::test]
    async fn resolver_only_knows_registered_magnets() {
        let resolver = MemoryResolver::new();
        let bytes = test_metainfo_bytes("demo", 16_384, &[1_000], false);
        resolver.register("magnet:?xt=urn:btih:demo", bytes.clone());

        let resolved = resolver
            .resolve_magnet("magnet:?xt=urn:btih:demo")
            .await
            .expect("resolve");
        assert_eq!(resolved, bytes);
        assert!(resolver.resolve_magnet("magnet:?xt=other").await.is_err());
    }
}
