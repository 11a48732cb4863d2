//! TTL disk cache for proxied API responses.
//!
//! Entries are files named `<sha1(key)>.<expiry-unix>`; the map of live
//! entries is rebuilt from the directory at startup and swept once a minute.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sha1::{Digest, Sha1};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Disk-backed response cache with per-entry expiry.
pub struct ResponseCache {
    dir: PathBuf,
    entries: Mutex<HashMap<String, i64>>,
}

impl ResponseCache {
    /// Open (and prune) the cache directory.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut entries = HashMap::new();
        let now = unix_now();
        for entry in std::fs::read_dir(&dir)?.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((hash, expiry)) = name.rsplit_once('.') else {
                continue;
            };
            let Ok(expiry) = expiry.parse::<i64>() else {
                continue;
            };
            if expiry < now {
                trace!(file = %name, "expired cache entry, removing");
                let _ = std::fs::remove_file(entry.path());
                continue;
            }
            entries.insert(hash.to_string(), expiry);
        }
        debug!(dir = %dir.display(), live = entries.len(), "cache opened");
        Ok(Self {
            dir,
            entries: Mutex::new(entries),
        })
    }

    fn file_for(&self, hash: &str, expiry: i64) -> PathBuf {
        self.dir.join(format!("{hash}.{expiry}"))
    }

    /// Fetch a cached value; expired entries are removed and miss.
    pub async fn read(&self, key: &str) -> Option<Vec<u8>> {
        let hash = hash_key(key);
        let mut entries = self.entries.lock().await;
        let expiry = *entries.get(&hash)?;
        let now = unix_now();
        if now <= expiry {
            trace!(key, "cache hit");
            tokio::fs::read(self.file_for(&hash, expiry)).await.ok()
        } else {
            trace!(key, "cache entry expired");
            let _ = tokio::fs::remove_file(self.file_for(&hash, expiry)).await;
            entries.remove(&hash);
            None
        }
    }

    /// Store a value for `ttl`, replacing any previous entry for the key.
    pub async fn write(&self, key: &str, value: &[u8], ttl: Duration) -> io::Result<()> {
        let hash = hash_key(key);
        let mut entries = self.entries.lock().await;
        if let Some(previous) = entries.get(&hash) {
            let _ = tokio::fs::remove_file(self.file_for(&hash, *previous)).await;
        }
        let expiry = unix_now() + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        trace!(key, expiry, "caching response");
        tokio::fs::write(self.file_for(&hash, expiry), value).await?;
        entries.insert(hash, expiry);
        Ok(())
    }

    /// Spawn the background sweep that evicts expired entries.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep().await;
            }
        })
    }

    async fn sweep(&self) {
        let now = unix_now();
        let mut entries = self.entries.lock().await;
        let expired: Vec<(String, i64)> = entries
            .iter()
            .filter(|(_, expiry)| **expiry < now)
            .map(|(hash, expiry)| (hash.clone(), *expiry))
            .collect();
        for (hash, expiry) in expired {
            trace!(hash = %hash, "sweeping expired cache entry");
            if let Err(err) = tokio::fs::remove_file(self.file_for(&hash, expiry)).await {
                warn!(hash = %hash, error = %err, "failed to remove cache file");
            }
            entries.remove(&hash);
        }
    }
}

fn hash_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_and_overwrite() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cache = ResponseCache::new(tmp.path().join("cache")).expect("open");

        assert!(cache.read("query").await.is_none());
        cache
            .write("query", b"first", Duration::from_secs(60))
            .await
            .expect("write");
        assert_eq!(cache.read("query").await.as_deref(), Some(&b"first"[..]));

        cache
            .write("query", b"second", Duration::from_secs(60))
            .await
            .expect("overwrite");
        assert_eq!(cache.read("query").await.as_deref(), Some(&b"second"[..]));

        let files: Vec<_> = std::fs::read_dir(tmp.path().join("cache"))
            .expect("read_dir")
            .flatten()
            .collect();
        assert_eq!(files.len(), 1, "overwrite replaces the old file");
    }

    #[tokio::test]
    async fn expired_entries_miss_and_disappear() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cache = ResponseCache::new(tmp.path().join("cache")).expect("open");

        cache
            .write("stale", b"old", Duration::from_secs(0))
            .await
            .expect("write");
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(cache.read("stale").await.is_none());
        let files: Vec<_> = std::fs::read_dir(tmp.path().join("cache"))
            .expect("read_dir")
            .flatten()
            .collect();
        assert!(files.is_empty(), "expired file removed on read");
    }

    #[tokio::test]
    async fn startup_scan_prunes_and_restores() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join("cache");
        {
            let cache = ResponseCache::new(&dir).expect("open");
            cache
                .write("keep", b"payload", Duration::from_secs(3_600))
                .await
                .expect("write");
        }
        // A stale file left behind by an earlier run.
        std::fs::write(dir.join(format!("{}.{}", "ab".repeat(20), 12)), b"junk").expect("write");

        let cache = ResponseCache::new(&dir).expect("reopen");
        assert_eq!(
            cache.read("keep").await.as_deref(),
            Some(&b"payload"[..]),
            "live entries survive a restart"
        );
        assert!(
            !dir.join(format!("{}.{}", "ab".repeat(20), 12)).exists(),
            "stale files are pruned at startup"
        );
    }
}
