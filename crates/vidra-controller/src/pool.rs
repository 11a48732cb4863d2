//! The torrent registry and its reconciliation logic.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};
use vidra_tags::{TagValue, Tags};
use vidra_torrent_core::{InfoHash, Metainfo, MetainfoResolver, TorrentEngine};
use vidra_watch::{Category, WatchEvent, is_descriptor};

use crate::error::{ControllerError, ControllerResult};
use crate::info::TorrentInfo;
use crate::record::{FileState, TorrentRecord, track_progress};
use crate::{
    KODI_EXPIRE_DAYS, MAX_CONNS_ACTIVE, MAX_CONNS_BACKGROUND, MAX_CONNS_PAUSED,
    PRIVATE_SEED_DAYS, PUBLIC_TRACKERS, RECONCILE_INTERVAL, SIDECAR_ECHO_WINDOW,
    WATCH_LATER_DAYS,
};

type Slots = Vec<Option<Arc<TorrentRecord>>>;

/// The registry of managed torrents.
///
/// All membership changes and every reconciliation pass run under one coarse
/// async mutex; record fields stay readable without it for best-effort HTTP
/// observers.
pub struct TorrentPool {
    engine: Arc<dyn TorrentEngine>,
    resolver: Arc<dyn MetainfoResolver>,
    default_category: String,
    registry: AsyncMutex<Slots>,
    categories: std::sync::Mutex<HashMap<String, Category>>,
}

impl TorrentPool {
    /// Build a pool over an engine and a magnet bootstrap resolver.
    ///
    /// `default_category` receives torrents whose requested category is
    /// unknown (typically the kodi category).
    #[must_use]
    pub fn new(
        engine: Arc<dyn TorrentEngine>,
        resolver: Arc<dyn MetainfoResolver>,
        default_category: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            resolver,
            default_category: default_category.into(),
            registry: AsyncMutex::new(Vec::new()),
            categories: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// The magnet bootstrap resolver this pool was built with.
    #[must_use]
    pub fn resolver(&self) -> Arc<dyn MetainfoResolver> {
        self.resolver.clone()
    }

    fn lock_categories(&self) -> std::sync::MutexGuard<'_, HashMap<String, Category>> {
        match self.categories.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a category as available.
    pub fn register_category(&self, category: Category) {
        self.lock_categories()
            .insert(category.name.clone(), category);
    }

    fn category_or_default(&self, name: &str) -> ControllerResult<Category> {
        let categories = self.lock_categories();
        categories
            .get(name)
            .or_else(|| categories.get(&self.default_category))
            .cloned()
            .ok_or_else(|| ControllerError::UnknownCategory {
                name: name.to_string(),
                fallback: self.default_category.clone(),
            })
    }

    /// Number of registry slots currently holding a record.
    pub async fn len(&self) -> usize {
        self.registry.lock().await.iter().flatten().count()
    }

    /// Whether the registry holds no records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Look a record up by any of its known names: engine name, record name,
    /// infohash, descriptor path, sidecar path, or magnet URI.
    pub async fn get(&self, key: &str) -> Option<Arc<TorrentRecord>> {
        let slots = self.registry.lock().await;
        Self::find_by_key(&slots, key)
    }

    /// Index lookup, valid only once the record's metadata arrived.
    pub async fn get_by_index(&self, index: usize) -> Option<Arc<TorrentRecord>> {
        let slots = self.registry.lock().await;
        slots
            .get(index)
            .and_then(Option::as_ref)
            .filter(|record| record.info_ready())
            .cloned()
    }

    /// Status snapshots for every managed torrent.
    pub async fn list_info(&self) -> Vec<TorrentInfo> {
        let slots = self.registry.lock().await;
        slots
            .iter()
            .flatten()
            .map(|record| record.torrent_info())
            .collect()
    }

    /// Status snapshots for torrents tagged `watch_later=yes`.
    pub async fn watch_later_info(&self) -> Vec<TorrentInfo> {
        let slots = self.registry.lock().await;
        slots
            .iter()
            .flatten()
            .filter(|record| record.with_tags(|tags| tags.flag("watch_later")))
            .map(|record| record.torrent_info())
            .collect()
    }

    /// Open playback readers across incomplete torrents.
    pub async fn active_plays(&self) -> usize {
        let slots = self.registry.lock().await;
        Self::active_plays_locked(&slots)
    }

    /// Pause every torrent that is not playing, not completed, and not
    /// pinned by `force_download`.
    pub async fn pause_not_in_play(&self) {
        let slots = self.registry.lock().await;
        for record in slots.iter().flatten() {
            if !(record.in_play() || record.completed() || record.force_download()) {
                record.pause("");
            }
        }
    }

    /// Admit a torrent from raw metainfo bytes.
    ///
    /// Idempotent by infohash: a duplicate add returns the existing record
    /// untouched. The registry slot is rolled back if the engine refuses the
    /// torrent.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Metainfo`] for undecodable bytes,
    /// [`ControllerError::UnknownCategory`] when neither the requested nor
    /// the default category exists, and [`ControllerError::Engine`] when the
    /// engine rejects the torrent.
    pub async fn add_torrent_from_data(
        &self,
        category: &str,
        name: &str,
        bytes: &[u8],
        initial: Tags,
    ) -> ControllerResult<Arc<TorrentRecord>> {
        info!(name, category, "adding torrent");
        let mut slots = self.registry.lock().await;

        let metainfo = Metainfo::parse(bytes)?;
        let hash = metainfo.info_hash();
        if let Some(existing) = Self::find_by_key(&slots, hash.as_str()) {
            debug!(info_hash = %hash, "already managed, returning existing record");
            return Ok(existing);
        }

        let category = self.category_or_default(category)?;
        let descriptor_name = if name.ends_with(".torrent") {
            name.to_string()
        } else {
            format!("{name}.torrent")
        };
        let torrent_path = category.fullpath.join(descriptor_name);

        let mut tags = initial;
        let now = Utc::now();
        tags.set_if_new("name", name);
        tags.set_if_new("category", category.name.as_str());
        tags.set_if_new("download", category.download.display().to_string());
        tags.set_if_new("fullpath", torrent_path.display().to_string());
        tags.set_if_new("tags_fullpath", format!("{}.tags.yaml", torrent_path.display()));
        tags.set_if_new("added", TagValue::time(now));
        tags.set_if_new("infohash", hash.as_str());

        let record = TorrentRecord::new(name, category.name.clone(), tags);
        let index = Self::insert_record(&mut slots, record.clone());

        let handle = match self.engine.add_metainfo(&metainfo, &category.download).await {
            Ok(handle) => handle,
            Err(source) => {
                Self::rollback_slot(&mut slots, index);
                return Err(ControllerError::Engine { source });
            }
        };
        if let Err(source) = handle.wait_info().await {
            Self::rollback_slot(&mut slots, index);
            return Err(ControllerError::Engine { source });
        }

        if metainfo.is_private() {
            record.with_tags(|tags| {
                tags.set_if_new("private", "yes");
                let added = tags.get_time("added").unwrap_or(now);
                tags.set_if_new(
                    "seed_until",
                    TagValue::time(added + Duration::days(PRIVATE_SEED_DAYS)),
                );
            });
        } else {
            let tiers: Vec<Vec<String>> = PUBLIC_TRACKERS
                .iter()
                .map(|tracker| vec![(*tracker).to_string()])
                .collect();
            handle.add_trackers(&tiers);
        }

        record.with_tags(|tags| {
            tags.set_if_new(
                "datapath",
                category.download.join(handle.name()).display().to_string(),
            );
        });

        let piece_length = handle.piece_length();
        let files = handle
            .files()
            .into_iter()
            .map(|file| FileState::new(file, piece_length))
            .collect();
        record.attach(handle, files);
        record.pause("");
        tokio::spawn(track_progress(record.clone()));
        Ok(record)
    }

    /// Admit a `.torrent` descriptor discovered on disk, overlaying any
    /// sidecar tags saved next to it.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Io`] when the descriptor cannot be read,
    /// plus everything [`TorrentPool::add_torrent_from_data`] can return.
    pub async fn add_torrent_from_file(
        &self,
        category: &Category,
        filename: &str,
        fullpath: &Path,
    ) -> ControllerResult<Arc<TorrentRecord>> {
        let metadata = fs::metadata(fullpath).map_err(|source| ControllerError::Io {
            path: fullpath.to_path_buf(),
            source,
        })?;
        if metadata.is_dir() || !is_descriptor(fullpath) {
            return Err(ControllerError::Io {
                path: fullpath.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "not a torrent descriptor",
                ),
            });
        }
        let bytes = fs::read(fullpath).map_err(|source| ControllerError::Io {
            path: fullpath.to_path_buf(),
            source,
        })?;

        let name = trim_descriptor_suffix(filename);
        let record = self
            .add_torrent_from_data(&category.name, name, &bytes, Tags::new())
            .await?;

        self.overlay_sidecar(&record);
        record.with_tags(|tags| tags.set_if_new("source", "from_file"));
        if let Some(handle) = record.engine_handle() {
            debug!(name = %record.name(), "verifying existing payload data");
            handle.verify_data();
        }
        self.process_record(&record).await;
        Ok(record)
    }

    /// Admit a `.magnet` descriptor: the file carries one magnet URI which is
    /// resolved through the isolated bootstrap instance.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Io`] for unreadable files,
    /// [`ControllerError::Magnet`] when resolution fails, plus everything
    /// [`TorrentPool::add_torrent_from_data`] can return.
    pub async fn add_magnet_file(
        &self,
        category: &Category,
        filename: &str,
        fullpath: &Path,
    ) -> ControllerResult<Arc<TorrentRecord>> {
        let uri = fs::read_to_string(fullpath)
            .map_err(|source| ControllerError::Io {
                path: fullpath.to_path_buf(),
                source,
            })?
            .trim()
            .to_string();
        if !uri.starts_with("magnet:") {
            return Err(ControllerError::Magnet {
                uri,
                source: anyhow::anyhow!("descriptor does not contain a magnet URI"),
            });
        }

        let bytes = self
            .resolver
            .resolve_magnet(&uri)
            .await
            .map_err(|source| ControllerError::Magnet {
                uri: uri.clone(),
                source,
            })?;

        let mut tags = Tags::new();
        tags.set("magnet", uri);
        let name = trim_descriptor_suffix(filename);
        let record = self
            .add_torrent_from_data(&category.name, name, &bytes, tags)
            .await?;
        self.overlay_sidecar(&record);
        record.with_tags(|tags| tags.set_if_new("source", "from_file"));
        self.process_record(&record).await;
        Ok(record)
    }

    fn overlay_sidecar(&self, record: &Arc<TorrentRecord>) {
        let sidecar = record.with_tags(|tags| tags.get_str("tags_fullpath", ""));
        if sidecar.is_empty() || !Path::new(&sidecar).is_file() {
            return;
        }
        match Tags::load_from(Path::new(&sidecar)) {
            Ok(saved) if saved.is_empty() => {
                warn!(path = %sidecar, "sidecar is empty, keeping seeded tags");
            }
            Ok(saved) => {
                record.with_tags(|tags| {
                    for (key, value) in saved.iter() {
                        tags.set(key.clone(), value.clone());
                    }
                });
            }
            Err(err) => warn!(path = %sidecar, error = %err, "failed to load sidecar"),
        }
    }

    /// Merge tag pairs into a record and reconcile the whole pool.
    ///
    /// Returns whether the key matched a record.
    pub async fn apply_tags(&self, key: &str, pairs: Vec<(String, String)>) -> bool {
        let mut slots = self.registry.lock().await;
        let Some(record) = Self::find_by_key(&slots, key) else {
            return false;
        };
        debug!(name = %record.name(), count = pairs.len(), "merging tags");
        record.with_tags(|tags| {
            for (key, value) in pairs {
                tags.set(key, value);
            }
        });
        self.process_all_locked(&mut slots).await;
        true
    }

    /// Reload a sidecar that changed on disk, unless it is this process's
    /// own write still inside the suppression window.
    pub async fn reload_tags(&self, path: &Path) {
        let loaded = match Tags::load_from(path) {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "sidecar reload failed");
                return;
            }
        };
        if loaded.is_empty() {
            warn!(path = %path.display(), "sidecar is empty, keeping in-memory tags");
            return;
        }
        let hash = loaded.get_str("infohash", "");
        if hash.is_empty() {
            warn!(path = %path.display(), "sidecar has no infohash, cannot match a record");
            return;
        }

        let slots = self.registry.lock().await;
        let Some(record) = Self::find_by_key(&slots, &hash) else {
            debug!(path = %path.display(), "no record for sidecar");
            return;
        };
        let now = Utc::now();
        if record.reload_suppressed(now) {
            debug!(name = %record.name(), "own sidecar write echo, skipping reload");
            return;
        }

        let paused = loaded.flag("paused");
        record.with_tags(|tags| *tags = loaded);
        if paused {
            record.pause("");
        } else {
            record.resume("sidecar reload");
        }
        record.with_tags(Tags::validate);
        info!(name = %record.name(), "tags reloaded from sidecar");
    }

    /// Reconcile every record once.
    pub async fn process_all(&self) {
        let mut slots = self.registry.lock().await;
        self.process_all_locked(&mut slots).await;
    }

    /// Reconcile a single record on demand.
    pub async fn process_record(&self, record: &Arc<TorrentRecord>) {
        let mut slots = self.registry.lock().await;
        self.process_tags_locked(&mut slots, record).await;
    }

    async fn process_all_locked(&self, slots: &mut AsyncMutexGuard<'_, Slots>) {
        let records: Vec<_> = slots.iter().flatten().cloned().collect();
        for record in records {
            self.process_tags_locked(slots, &record).await;
        }
    }

    /// Spawn the periodic reconciliation task.
    #[must_use]
    pub fn spawn_reconciler(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                pool.process_all().await;
            }
        })
    }

    /// Spawn the task that feeds watcher events into the pool. Ends when the
    /// watcher channel closes.
    #[must_use]
    pub fn spawn_event_dispatcher(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<WatchEvent>,
    ) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                pool.handle_event(event).await;
            }
            error!("watch event stream ended");
        })
    }

    /// Apply one watcher event.
    pub async fn handle_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::CategoryCreated { category } => {
                debug!(name = %category.name, "category available");
                self.register_category(category.clone());
                self.ingest_category(&category).await;
            }
            WatchEvent::CategoryRemoved { category } => {
                // Active records keep running; the category just stops
                // accepting new descriptors until a rescan revives it.
                warn!(name = %category.name, "category removed");
                let mut categories = self.lock_categories();
                if let Some(entry) = categories.get_mut(&category.name) {
                    entry.ready = false;
                }
            }
            WatchEvent::CategoryLoaded => {
                info!("initial category scan complete, watching live events");
            }
            WatchEvent::TorrentFileCreated {
                category,
                file,
                fullpath,
            } => {
                self.ingest_descriptor(&category, &file, &fullpath).await;
            }
            WatchEvent::TorrentFileRemoved { file, fullpath, .. } => {
                if file.ends_with(".torrent") {
                    warn!(file, "descriptor deleted, marking torrent for removal");
                    let mut slots = self.registry.lock().await;
                    if let Some(record) =
                        Self::find_by_key(&slots, &fullpath.display().to_string())
                    {
                        record.with_tags(|tags| tags.set_if_new("delete_it", "yes"));
                        self.process_all_locked(&mut slots).await;
                    }
                }
            }
        }
    }

    async fn ingest_category(&self, category: &Category) {
        info!(name = %category.name, path = %category.fullpath.display(), "scanning category");
        let entries = match fs::read_dir(&category.fullpath) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(name = %category.name, error = %err, "category scan failed");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && is_descriptor(&path) {
                let file = entry.file_name().to_string_lossy().into_owned();
                self.ingest_descriptor(category, &file, &path).await;
            }
        }
    }

    async fn ingest_descriptor(&self, category: &Category, file: &str, fullpath: &Path) {
        if file.ends_with(".yaml") {
            self.reload_tags(fullpath).await;
        } else if file.ends_with(".magnet") {
            if let Err(err) = self.add_magnet_file(category, file, fullpath).await {
                warn!(file, error = %err, "magnet descriptor rejected");
            }
        } else if file.ends_with(".torrent") {
            if let Err(err) = self.add_torrent_from_file(category, file, fullpath).await {
                warn!(file, error = ?err, "torrent descriptor rejected");
            }
        }
    }

    async fn process_tags_locked(
        &self,
        slots: &mut AsyncMutexGuard<'_, Slots>,
        record: &Arc<TorrentRecord>,
    ) {
        if record.is_dead() {
            return;
        }
        let Some(handle) = record.engine_handle() else {
            trace!(name = %record.name(), "metadata pending, skipping");
            return;
        };
        trace!(name = %record.name(), "processing tags");

        let now = Utc::now();
        let completed = handle.bytes_missing() == 0;
        let stats = handle.stats();

        record.with_tags(|tags| {
            record.sync_force_download(tags.flag("force_download"));
            refresh_completed_marker(tags, completed);
            let (down0, up0) = record.initial_totals(tags);
            tags.set(
                "downloaded_bytes",
                down0.saturating_add(i64::try_from(stats.bytes_read_useful).unwrap_or(i64::MAX)),
            );
            tags.set(
                "upload_bytes",
                up0.saturating_add(i64::try_from(stats.bytes_written).unwrap_or(i64::MAX)),
            );
        });

        if record.in_play() {
            record.resume("InPlay");
        }

        record.with_tags(|tags| {
            if tags.flag("kill_it") {
                tags.set("want_drop", "yes");
                tags.set("delete_data", "yes");
                tags.set("force_delete", "yes");
            }
            if tags.flag("drop_it") {
                tags.set("want_drop", "yes");
                tags.set("delete_data", "no");
            }
            if tags.flag("delete_it") {
                tags.set("want_drop", "yes");
            }
            if tags.flag("save_to_library") {
                // Leaves the pool, payload stays for the library.
                tags.set("want_drop", "yes");
                tags.remove("delete_data");
            }
            if tags.flag("watch_later") {
                tags.set_if_new(
                    "watch_later_expiration",
                    TagValue::time(now + Duration::days(WATCH_LATER_DAYS)),
                );
                if tags
                    .get_time("watch_later_expiration")
                    .is_some_and(|deadline| deadline <= now)
                {
                    tags.set("want_drop", "yes");
                    tags.set("delete_data", "yes");
                }
            }
            if tags.get_str("source", "") == "kodi" {
                let added = tags.get_time("added").unwrap_or(now);
                tags.set_if_new(
                    "kodi_expires_at",
                    TagValue::time(added + Duration::days(KODI_EXPIRE_DAYS)),
                );
                if tags
                    .get_time("kodi_expires_at")
                    .is_some_and(|deadline| deadline <= now)
                {
                    tags.set("want_drop", "yes");
                    tags.set("delete_data", "yes");
                    tags.set("force_delete", "yes");
                }
            }
        });

        if record.with_tags(|tags| tags.flag("want_drop")) && record.can_delete() {
            if record.is_paused() {
                self.drop_record(slots, record).await;
            } else {
                // Stop transfers first; the actual drop happens next tick.
                record.pause("dropping");
            }
            return;
        }

        let global_plays = Self::active_plays_locked(slots);
        let private = handle.is_private();
        let target = if record.active_readers() > 0 {
            MAX_CONNS_ACTIVE
        } else if global_plays > 0 {
            if private && completed {
                MAX_CONNS_ACTIVE
            } else {
                MAX_CONNS_BACKGROUND
            }
        } else if private || !completed {
            MAX_CONNS_ACTIVE
        } else {
            MAX_CONNS_BACKGROUND
        };

        if completed {
            record.resume("torrent completed, ok to upload");
        }

        let previous = handle.set_max_connections(target);
        if previous != target {
            trace!(name = %record.name(), previous, target, "connection cap adjusted");
        }
        record.with_tags(|tags| tags.set("maxConnections", i64::from(target)));

        if record.with_tags(|tags| !tags.validated()) {
            record.save_torrent_file();
            record.save_tags();
            record.set_reload_suppression(
                now + Duration::from_std(SIDECAR_ECHO_WINDOW).unwrap_or_default(),
            );
        }

        // Reassert engine state; pause/resume may have raced since the
        // flags were last applied.
        if record.is_paused() {
            handle.disallow_data_download();
            handle.set_max_connections(MAX_CONNS_PAUSED);
        } else {
            handle.allow_data_download();
        }
    }

    async fn drop_record(
        &self,
        slots: &mut AsyncMutexGuard<'_, Slots>,
        record: &Arc<TorrentRecord>,
    ) {
        let hash = record.with_tags(|tags| tags.get_str("infohash", ""));
        match InfoHash::parse(&hash) {
            Ok(hash) => {
                if let Err(err) = self.engine.remove(&hash).await {
                    warn!(name = %record.name(), error = %err, "engine remove failed");
                }
            }
            Err(err) => warn!(name = %record.name(), error = %err, "record has no usable infohash"),
        }
        Self::remove_locked(slots, record);

        let (delete_data, datapath, fullpath, tags_fullpath) = record.with_tags(|tags| {
            (
                tags.flag("delete_data"),
                tags.get_str("datapath", ""),
                tags.get_str("fullpath", ""),
                tags.get_str("tags_fullpath", ""),
            )
        });
        if delete_data && !datapath.is_empty() {
            match fs::remove_dir_all(&datapath) {
                Ok(()) => info!(name = %record.name(), path = %datapath, "payload data removed"),
                Err(err) => warn!(path = %datapath, error = %err, "payload removal failed"),
            }
        }
        for descriptor in [fullpath, tags_fullpath] {
            if descriptor.is_empty() {
                continue;
            }
            if let Err(err) = fs::remove_file(&descriptor) {
                debug!(path = %descriptor, error = %err, "descriptor unlink failed");
            }
        }
        record.set_dead();
        info!(name = %record.name(), delete_data, "torrent dropped");
    }

    fn find_by_key(slots: &Slots, key: &str) -> Option<Arc<TorrentRecord>> {
        if key.is_empty() {
            return None;
        }
        slots
            .iter()
            .flatten()
            .find(|record| {
                record
                    .engine_handle()
                    .is_some_and(|handle| handle.name() == key)
                    || record.name() == key
                    || record.with_tags(|tags| {
                        tags.get_str("infohash", "") == key
                            || tags.get_str("fullpath", "\u{0}") == key
                            || tags.get_str("tags_fullpath", "\u{0}") == key
                            || tags.get_str("magnet", "\u{0}") == key
                    })
            })
            .cloned()
    }

    fn active_plays_locked(slots: &Slots) -> usize {
        slots
            .iter()
            .flatten()
            .filter(|record| record.in_play() && !record.completed())
            .map(|record| record.active_readers())
            .sum()
    }

    fn insert_record(slots: &mut Slots, record: Arc<TorrentRecord>) -> usize {
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                record.set_slot(index);
                *slot = Some(record);
                return index;
            }
        }
        record.set_slot(slots.len());
        slots.push(Some(record));
        slots.len() - 1
    }

    fn rollback_slot(slots: &mut Slots, index: usize) {
        if index + 1 == slots.len() {
            slots.pop();
        } else if let Some(slot) = slots.get_mut(index) {
            *slot = None;
        }
    }

    fn remove_locked(slots: &mut Slots, record: &Arc<TorrentRecord>) {
        let index = record.slot();
        let held = slots
            .get(index)
            .and_then(Option::as_ref)
            .is_some_and(|occupant| Arc::ptr_eq(occupant, record));
        let index = if held {
            Some(index)
        } else {
            slots.iter().position(|slot| {
                slot.as_ref()
                    .is_some_and(|occupant| Arc::ptr_eq(occupant, record))
            })
        };
        let Some(index) = index else {
            return;
        };
        let last = slots.len() - 1;
        slots.swap(index, last);
        slots.pop();
        if index < slots.len()
            && let Some(moved) = slots[index].as_ref()
        {
            moved.set_slot(index);
        }
    }
}

fn refresh_completed_marker(tags: &mut Tags, completed: bool) {
    let marker = if completed { "yes" } else { "no" };
    match tags.get("completed") {
        // A completion milestone timestamp is never overwritten.
        Some(TagValue::Time(_)) => {}
        _ => tags.set("completed", marker),
    }
}

fn trim_descriptor_suffix(filename: &str) -> &str {
    filename
        .strip_suffix(".torrent")
        .or_else(|| filename.strip_suffix(".magnet"))
        .unwrap_or(filename)
}
