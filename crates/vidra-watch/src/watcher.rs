//! The watcher driver task.
//!
//! One task owns the notify backend, the category catalog, and the debounce
//! timers. Raw notifications arrive over an internal channel (the notify
//! callback blocks when the driver falls behind, preserving per-path order)
//! and leave as [`WatchEvent`]s on the bounded output channel.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::error::{WatchError, WatchResult};
use crate::events::{Category, WatchEvent};
use crate::{WRITE_SETTLE, is_descriptor};

const RAW_CHANNEL_CAPACITY: usize = 256;

enum DriverMsg {
    Fs(notify::Event),
    Fired(PathBuf),
    Lost(notify::Error),
}

/// Handle over the watcher driver task; dropping it stops the watcher.
pub struct CategoryWatcher {
    driver: JoinHandle<()>,
}

impl CategoryWatcher {
    /// Start watching `root`, returning the handle and the event stream.
    ///
    /// The startup scan emits one `CategoryCreated` per ready category
    /// followed by the `CategoryLoaded` sentinel. The output channel is
    /// bounded by `capacity`; the driver blocks rather than dropping events.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Io`] when the root cannot be resolved and
    /// [`WatchError::Notify`] when the notification backend cannot start.
    pub fn spawn(
        root: impl Into<PathBuf>,
        capacity: usize,
    ) -> WatchResult<(Self, mpsc::Receiver<WatchEvent>)> {
        let root = root.into();
        let root = fs::canonicalize(&root).map_err(|source| WatchError::Io {
            operation: "canonicalize",
            path: root.clone(),
            source,
        })?;

        let (raw_tx, raw_rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);
        let callback_tx = raw_tx.clone();
        let watcher = notify::recommended_watcher(
            move |outcome: Result<notify::Event, notify::Error>| {
                let message = match outcome {
                    Ok(event) => DriverMsg::Fs(event),
                    Err(err) => DriverMsg::Lost(err),
                };
                let _ = callback_tx.blocking_send(message);
            },
        )
        .map_err(|source| WatchError::Notify {
            path: root.clone(),
            source,
        })?;

        let (out_tx, out_rx) = mpsc::channel(capacity);
        let driver = tokio::spawn(drive(watcher, root, raw_tx, raw_rx, out_tx));
        Ok((Self { driver }, out_rx))
    }
}

impl Drop for CategoryWatcher {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn drive(
    watcher: RecommendedWatcher,
    root: PathBuf,
    raw_tx: mpsc::Sender<DriverMsg>,
    mut raw_rx: mpsc::Receiver<DriverMsg>,
    out: mpsc::Sender<WatchEvent>,
) {
    let mut state = Driver {
        watcher,
        root,
        categories: HashMap::new(),
        pending: HashMap::new(),
        raw_tx,
        out,
    };

    if let Err(err) = state.scan_categories().await {
        error!(error = %err, "startup category scan failed");
        return;
    }
    if state.out.send(WatchEvent::CategoryLoaded).await.is_err() {
        return;
    }

    while let Some(message) = raw_rx.recv().await {
        match message {
            DriverMsg::Fs(event) => state.process(event).await,
            DriverMsg::Fired(path) => state.debounce_fired(path).await,
            DriverMsg::Lost(err) => {
                // The event stream is this system's clock; without it the
                // registry desynchronizes, so stop rather than limp on.
                error!(error = %err, "filesystem watch stream failed, stopping watcher");
                break;
            }
        }
    }
}

struct Driver {
    watcher: RecommendedWatcher,
    root: PathBuf,
    categories: HashMap<String, Category>,
    pending: HashMap<PathBuf, JoinHandle<()>>,
    raw_tx: mpsc::Sender<DriverMsg>,
    out: mpsc::Sender<WatchEvent>,
}

impl Driver {
    async fn scan_categories(&mut self) -> WatchResult<()> {
        debug!(root = %self.root.display(), "scanning categories");
        let entries = fs::read_dir(&self.root).map_err(|source| WatchError::Io {
            operation: "read_dir",
            path: self.root.clone(),
            source,
        })?;

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let fullpath = entry.path();
            if !fullpath.is_dir() {
                warn!(path = %fullpath.display(), "category entry is not a directory, ignoring");
                continue;
            }
            let category = self
                .categories
                .entry(name.clone())
                .or_insert_with(|| Category {
                    name,
                    download: fullpath.join("downloads"),
                    fullpath,
                    ready: false,
                });
            category.ready = category.download.is_dir();

            if let Err(err) = self
                .watcher
                .watch(&category.fullpath, RecursiveMode::NonRecursive)
            {
                warn!(path = %category.fullpath.display(), error = %err, "failed to watch category");
                continue;
            }
            if category.ready {
                let snapshot = category.clone();
                let _ = self
                    .out
                    .send(WatchEvent::CategoryCreated { category: snapshot })
                    .await;
            } else {
                debug!(name = %category.name, "category has no downloads directory yet");
            }
        }

        self.watcher
            .watch(&self.root, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Notify {
                path: self.root.clone(),
                source,
            })?;
        Ok(())
    }

    async fn process(&mut self, event: notify::Event) {
        trace!(?event, "raw fs event");
        match event.kind {
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in event.paths {
                    self.removed(&path).await;
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut paths = event.paths.into_iter();
                if let Some(from) = paths.next() {
                    self.removed(&from).await;
                }
                if let Some(to) = paths.next() {
                    self.created(to).await;
                }
            }
            EventKind::Create(_)
            | EventKind::Modify(
                ModifyKind::Data(_)
                | ModifyKind::Any
                | ModifyKind::Name(RenameMode::To | RenameMode::Any),
            ) => {
                for path in event.paths {
                    self.created(path).await;
                }
            }
            other => trace!(kind = ?other, "ignoring fs event kind"),
        }
    }

    async fn removed(&mut self, path: &Path) {
        // Payload directory gone: the category stops being usable but keeps
        // its catalog slot so a later rescan can revive it.
        let download_hit = self
            .categories
            .values_mut()
            .find(|category| category.download == *path);
        if let Some(category) = download_hit {
            debug!(name = %category.name, "downloads directory removed");
            if category.ready {
                category.ready = false;
                let snapshot = category.clone();
                let _ = self
                    .out
                    .send(WatchEvent::CategoryRemoved { category: snapshot })
                    .await;
            }
            return;
        }

        let root_hit = self
            .categories
            .iter()
            .find(|(_, category)| category.fullpath == *path)
            .map(|(name, _)| name.clone());
        if let Some(category) = root_hit.and_then(|name| self.categories.remove(&name)) {
            debug!(name = %category.name, "category directory removed");
            let _ = self.watcher.unwatch(&category.fullpath);
            if category.ready {
                let _ = self
                    .out
                    .send(WatchEvent::CategoryRemoved { category })
                    .await;
            }
            return;
        }

        if is_descriptor(path) {
            if let Some(category) = self.category_of(path) {
                let file = file_name_of(path);
                let _ = self
                    .out
                    .send(WatchEvent::TorrentFileRemoved {
                        category,
                        file,
                        fullpath: path.to_path_buf(),
                    })
                    .await;
            } else {
                warn!(path = %path.display(), "descriptor removed outside any category");
            }
            return;
        }
        trace!(path = %path.display(), "ignoring removal");
    }

    async fn created(&mut self, path: PathBuf) {
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                trace!(path = %path.display(), error = %err, "stat failed, ignoring event");
                return;
            }
        };

        if metadata.is_dir() {
            debug!(path = %path.display(), "new directory at category level, rescanning");
            if let Err(err) = self.scan_categories().await {
                warn!(error = %err, "rescan failed");
            }
            return;
        }

        if !is_descriptor(&path) {
            trace!(path = %path.display(), "not a descriptor, ignoring");
            return;
        }

        let tx = self.raw_tx.clone();
        let fire_for = path.clone();
        trace!(path = %path.display(), "starting write-settle timer");
        let timer = tokio::spawn(async move {
            tokio::time::sleep(WRITE_SETTLE).await;
            let _ = tx.send(DriverMsg::Fired(fire_for)).await;
        });
        if let Some(previous) = self.pending.insert(path, timer) {
            previous.abort();
        }
    }

    async fn debounce_fired(&mut self, path: PathBuf) {
        self.pending.remove(&path);
        let Some(category) = self.category_of(&path) else {
            warn!(path = %path.display(), "write settled outside any category");
            return;
        };
        let file = file_name_of(&path);
        trace!(path = %path.display(), "write settled, emitting created event");
        let _ = self
            .out
            .send(WatchEvent::TorrentFileCreated {
                category,
                file,
                fullpath: path,
            })
            .await;
    }

    fn category_of(&self, path: &Path) -> Option<Category> {
        let parent = path.parent()?;
        self.categories
            .values()
            .find(|category| category.fullpath == parent)
            .cloned()
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const EVENT_WAIT: Duration = Duration::from_secs(6);

    async fn next_matching<F>(
        events: &mut mpsc::Receiver<WatchEvent>,
        mut predicate: F,
    ) -> WatchEvent
    where
        F: FnMut(&WatchEvent) -> bool,
    {
        loop {
            let event = timeout(EVENT_WAIT, events.recv())
                .await
                .expect("waiting for event timed out")
                .expect("event stream closed");
            if predicate(&event) {
                return event;
            }
        }
    }

    fn make_category(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("downloads")).expect("mkdir");
        dir
    }

    #[tokio::test]
    async fn startup_scan_emits_ready_categories_then_loaded() {
        let tmp = tempfile::tempdir().expect("tempdir");
        make_category(tmp.path(), "video");
        fs::create_dir(tmp.path().join("empty")).expect("mkdir");

        let (_watcher, mut events) =
            CategoryWatcher::spawn(tmp.path(), 16).expect("spawn watcher");

        let mut created = Vec::new();
        loop {
            let event = timeout(EVENT_WAIT, events.recv())
                .await
                .expect("startup events timed out")
                .expect("stream closed");
            match event {
                WatchEvent::CategoryCreated { category } => created.push(category),
                WatchEvent::CategoryLoaded => break,
                other => panic!("unexpected startup event {other:?}"),
            }
        }
        assert_eq!(created.len(), 1, "only ready categories announce");
        assert_eq!(created[0].name, "video");
        assert!(created[0].download.ends_with("video/downloads"));
    }

    #[tokio::test]
    async fn write_burst_fires_one_created_event() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let video = make_category(tmp.path(), "video");
        let (_watcher, mut events) =
            CategoryWatcher::spawn(tmp.path(), 16).expect("spawn watcher");
        next_matching(&mut events, |event| {
            matches!(event, WatchEvent::CategoryLoaded)
        })
        .await;

        let descriptor = video.join("movie.torrent");
        for chunk in 0..3 {
            fs::write(&descriptor, format!("burst {chunk}")).expect("write");
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let event = next_matching(&mut events, |event| {
            matches!(event, WatchEvent::TorrentFileCreated { .. })
        })
        .await;
        let WatchEvent::TorrentFileCreated { file, category, .. } = event else {
            unreachable!()
        };
        assert_eq!(file, "movie.torrent");
        assert_eq!(category.name, "video");

        // The burst must have collapsed into exactly one event.
        let extra = timeout(Duration::from_secs(3), events.recv()).await;
        assert!(
            extra.is_err(),
            "expected silence after the settled write, got {extra:?}"
        );
    }

    #[tokio::test]
    async fn rename_settles_under_the_final_name() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let video = make_category(tmp.path(), "video");
        let (_watcher, mut events) =
            CategoryWatcher::spawn(tmp.path(), 16).expect("spawn watcher");
        next_matching(&mut events, |event| {
            matches!(event, WatchEvent::CategoryLoaded)
        })
        .await;

        fs::write(video.join("draft.torrent"), "payload").expect("write");
        tokio::time::sleep(Duration::from_millis(200)).await;
        fs::rename(video.join("draft.torrent"), video.join("final.torrent")).expect("rename");

        let event = next_matching(&mut events, |event| {
            matches!(
                event,
                WatchEvent::TorrentFileCreated { file, .. } if file == "final.torrent"
            )
        })
        .await;
        let WatchEvent::TorrentFileCreated { fullpath, .. } = event else {
            unreachable!()
        };
        assert!(fullpath.ends_with("video/final.torrent"));
    }

    #[tokio::test]
    async fn descriptor_removal_is_reported() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let video = make_category(tmp.path(), "video");
        let descriptor = video.join("movie.torrent");
        fs::write(&descriptor, "payload").expect("write");

        let (_watcher, mut events) =
            CategoryWatcher::spawn(tmp.path(), 16).expect("spawn watcher");
        next_matching(&mut events, |event| {
            matches!(event, WatchEvent::CategoryLoaded)
        })
        .await;

        fs::remove_file(&descriptor).expect("remove");
        let event = next_matching(&mut events, |event| {
            matches!(event, WatchEvent::TorrentFileRemoved { .. })
        })
        .await;
        let WatchEvent::TorrentFileRemoved { file, .. } = event else {
            unreachable!()
        };
        assert_eq!(file, "movie.torrent");
    }

    #[tokio::test]
    async fn removing_downloads_dir_reports_category_removed() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let video = make_category(tmp.path(), "video");
        let (_watcher, mut events) =
            CategoryWatcher::spawn(tmp.path(), 16).expect("spawn watcher");
        next_matching(&mut events, |event| {
            matches!(event, WatchEvent::CategoryLoaded)
        })
        .await;

        fs::remove_dir(video.join("downloads")).expect("rmdir");
        let event = next_matching(&mut events, |event| {
            matches!(event, WatchEvent::CategoryRemoved { .. })
        })
        .await;
        let WatchEvent::CategoryRemoved { category } = event else {
            unreachable!()
        };
        assert_eq!(category.name, "video");
    }

    #[tokio::test]
    async fn new_category_directory_triggers_rescan() {
        let tmp = tempfile::tempdir().expect("tempdir");
        make_category(tmp.path(), "video");
        let (_watcher, mut events) =
            CategoryWatcher::spawn(tmp.path(), 16).expect("spawn watcher");
        next_matching(&mut events, |event| {
            matches!(event, WatchEvent::CategoryLoaded)
        })
        .await;

        make_category(tmp.path(), "shows");
        let event = next_matching(&mut events, |event| {
            matches!(
                event,
                WatchEvent::CategoryCreated { category } if category.name == "shows"
            )
        })
        .await;
        let WatchEvent::CategoryCreated { category } = event else {
            unreachable!()
        };
        assert!(category.ready);
    }

    #[tokio::test]
    async fn hidden_and_unknown_files_stay_silent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let video = make_category(tmp.path(), "video");
        let (_watcher, mut events) =
            CategoryWatcher::spawn(tmp.path(), 16).expect("spawn watcher");
        next_matching(&mut events, |event| {
            matches!(event, WatchEvent::CategoryLoaded)
        })
        .await;

        fs::write(video.join(".hidden.torrent"), "x").expect("write");
        fs::write(video.join("notes.txt"), "x").expect("write");

        let extra = timeout(Duration::from_secs(3), events.recv()).await;
        assert!(extra.is_err(), "expected no events, got {extra:?}");
    }
}
