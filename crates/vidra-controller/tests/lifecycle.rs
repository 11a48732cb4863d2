//! Lifecycle scenarios: admission, tag policy, drops, persistence.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;
use vidra_controller::{MAX_CONNS_ACTIVE, MAX_CONNS_BACKGROUND, MAX_CONNS_PAUSED, TorrentPool};
use vidra_tags::{TagValue, Tags};
use vidra_torrent_core::{EngineTorrent, SwarmStats};
use vidra_torrent_core::memory::{MemoryEngine, MemoryResolver, MemoryTorrent, test_metainfo_bytes};
use vidra_watch::{Category, WatchEvent};

struct Fixture {
    _tmp: TempDir,
    engine: Arc<MemoryEngine>,
    resolver: Arc<MemoryResolver>,
    pool: Arc<TorrentPool>,
    category: Category,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().expect("tempdir");
    let fullpath = tmp.path().join("video");
    let download = fullpath.join("downloads");
    fs::create_dir_all(&download).expect("mkdir");

    let engine = Arc::new(MemoryEngine::new());
    let resolver = Arc::new(MemoryResolver::new());
    let pool = TorrentPool::new(engine.clone(), resolver.clone(), "video");
    let category = Category {
        name: "video".to_string(),
        fullpath,
        download,
        ready: true,
    };
    pool.register_category(category.clone());
    Fixture {
        _tmp: tmp,
        engine,
        resolver,
        pool,
        category,
    }
}

impl Fixture {
    async fn add(&self, name: &str, bytes: &[u8], tags: Tags) -> Arc<vidra_controller::TorrentRecord> {
        self.pool
            .add_torrent_from_data("video", name, bytes, tags)
            .await
            .expect("add torrent")
    }

    fn backing(&self, record: &vidra_controller::TorrentRecord) -> Arc<MemoryTorrent> {
        let hash = record
            .engine_handle()
            .expect("handle attached")
            .info_hash();
        self.engine.get(&hash).expect("engine holds torrent")
    }
}

fn plain_torrent(name: &str) -> Vec<u8> {
    test_metainfo_bytes(name, 16_384, &[65_536], false)
}

#[tokio::test]
async fn add_seeds_identity_tags_and_pauses() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;

    assert!(record.is_paused(), "fresh torrents start paused");
    assert!(record.info_ready());
    let tags = record.tags_snapshot();
    assert_eq!(tags.get_str("paused", ""), "yes");
    assert_eq!(tags.get_str("name", ""), "movie");
    assert_eq!(tags.get_str("category", ""), "video");
    assert_eq!(
        tags.get_str("infohash", ""),
        record.engine_handle().unwrap().info_hash().as_str()
    );
    assert!(tags.get_str("fullpath", "").ends_with("video/movie.torrent"));
    assert!(
        tags.get_str("tags_fullpath", "")
            .ends_with("video/movie.torrent.tags.yaml")
    );
    assert!(tags.get_time("added").is_some());
    assert!(tags.get_str("datapath", "").contains("downloads"));

    let backing = fx.backing(&record);
    assert_eq!(backing.max_connections(), MAX_CONNS_PAUSED);
    assert!(!backing.data_download_allowed(), "paused forbids data");
    assert!(
        !backing.extra_trackers().is_empty(),
        "public torrents get extra trackers"
    );
}

#[tokio::test]
async fn add_is_idempotent_by_infohash() {
    let fx = fixture();
    let bytes = plain_torrent("movie");
    let first = fx.add("movie", &bytes, Tags::new()).await;
    let second = fx.add("movie-again", &bytes, Tags::new()).await;
    assert!(Arc::ptr_eq(&first, &second), "duplicate add returns existing");
    assert_eq!(fx.pool.len().await, 1);
    assert_eq!(fx.engine.len(), 1);
}

#[tokio::test]
async fn engine_rejection_rolls_back_the_slot() {
    let fx = fixture();
    let err = fx
        .pool
        .add_torrent_from_data("video", "junk", b"not bencode at all", Tags::new())
        .await
        .expect_err("garbage descriptor");
    assert!(matches!(
        err,
        vidra_controller::ControllerError::Metainfo { .. }
    ));
    assert!(fx.pool.is_empty().await);
}

#[tokio::test]
async fn unknown_category_falls_back_to_default() {
    let fx = fixture();
    let record = fx
        .pool
        .add_torrent_from_data("no-such", "movie", &plain_torrent("movie"), Tags::new())
        .await
        .expect("fallback to default");
    assert_eq!(record.category(), "video");

    let lonely_pool = TorrentPool::new(
        fx.engine.clone(),
        fx.resolver.clone(),
        "also-missing",
    );
    let err = lonely_pool
        .add_torrent_from_data("no-such", "other", &plain_torrent("other"), Tags::new())
        .await
        .expect_err("no category at all");
    assert!(matches!(
        err,
        vidra_controller::ControllerError::UnknownCategory { .. }
    ));
}

#[tokio::test]
async fn registry_lookups_cover_all_addressing_modes() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;
    let tags = record.tags_snapshot();

    for key in [
        "movie",
        &tags.get_str("infohash", ""),
        &tags.get_str("fullpath", ""),
        &tags.get_str("tags_fullpath", ""),
    ] {
        let found = fx.pool.get(key).await.expect("lookup");
        assert!(Arc::ptr_eq(&found, &record), "lookup by {key:?}");
    }
    assert!(fx.pool.get("unrelated").await.is_none());

    let indexed = fx.pool.get_by_index(0).await.expect("index lookup");
    assert!(Arc::ptr_eq(&indexed, &record));
    assert!(fx.pool.get_by_index(7).await.is_none());
}

#[tokio::test]
async fn drop_while_downloading_takes_two_ticks() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;
    record.resume("test download");
    assert!(!record.is_paused());

    // Descriptors must exist so the drop can unlink them.
    fx.pool.process_all().await;
    let tags = record.tags_snapshot();
    let fullpath = PathBuf::from(tags.get_str("fullpath", ""));
    let sidecar = PathBuf::from(tags.get_str("tags_fullpath", ""));
    assert!(fullpath.is_file(), "descriptor persisted on first tick");
    assert!(sidecar.is_file(), "sidecar persisted on first tick");

    let datapath = PathBuf::from(tags.get_str("datapath", ""));
    fs::create_dir_all(&datapath).expect("mkdir datapath");
    fs::write(datapath.join("payload.bin"), b"data").expect("payload");

    assert!(fx.pool.apply_tags("movie", vec![("kill_it".into(), "yes".into())]).await);
    // apply_tags ran one pass: the torrent pauses first, drop comes next tick.
    assert!(record.is_paused(), "first tick pauses before dropping");
    assert!(!record.is_dead());

    fx.pool.process_all().await;
    assert!(record.is_dead(), "second tick drops");
    assert!(fx.pool.is_empty().await);
    assert!(fx.engine.is_empty(), "engine released the torrent");
    assert!(!datapath.exists(), "kill_it removes payload data");
    assert!(!fullpath.exists(), "descriptor unlinked");
    assert!(!sidecar.exists(), "sidecar unlinked");
}

#[tokio::test]
async fn drop_it_preserves_payload_data() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;
    fx.pool.process_all().await;

    let tags = record.tags_snapshot();
    let datapath = PathBuf::from(tags.get_str("datapath", ""));
    fs::create_dir_all(&datapath).expect("mkdir datapath");
    fs::write(datapath.join("payload.bin"), b"data").expect("payload");

    assert!(fx.pool.apply_tags("movie", vec![("drop_it".into(), "yes".into())]).await);
    // Already paused, so the drop happens on the same pass.
    assert!(record.is_dead());
    assert!(fx.pool.is_empty().await);
    assert!(datapath.join("payload.bin").is_file(), "payload kept");
}

#[tokio::test]
async fn save_to_library_drops_without_deleting_data() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;
    fx.pool.process_all().await;

    let tags = record.tags_snapshot();
    let datapath = PathBuf::from(tags.get_str("datapath", ""));
    fs::create_dir_all(&datapath).expect("mkdir datapath");
    fs::write(datapath.join("movie.mkv"), b"library copy").expect("payload");

    assert!(
        fx.pool
            .apply_tags("movie", vec![("save_to_library".into(), "yes".into())])
            .await
    );
    assert!(record.is_dead());
    assert!(datapath.join("movie.mkv").is_file(), "library copy survives");
}

#[tokio::test]
async fn private_seed_window_blocks_delete_until_forced() {
    let fx = fixture();
    let bytes = test_metainfo_bytes("secret", 16_384, &[65_536], true);
    let record = fx.add("secret", &bytes, Tags::new()).await;

    let tags = record.tags_snapshot();
    assert_eq!(tags.get_str("private", ""), "yes");
    let added = tags.get_time("added").expect("added");
    let seed_until = tags.get_time("seed_until").expect("seed window");
    assert_eq!(seed_until, added + Duration::days(21));

    assert!(
        fx.pool
            .apply_tags("secret", vec![("delete_it".into(), "yes".into())])
            .await
    );
    assert!(!record.is_dead(), "seed window keeps the torrent");
    assert_eq!(fx.pool.len().await, 1);
    assert!(record.tags_snapshot().flag("want_drop"));

    assert!(
        fx.pool
            .apply_tags("secret", vec![("force_delete".into(), "yes".into())])
            .await
    );
    assert!(record.is_dead(), "force_delete overrides the window");
    assert!(fx.pool.is_empty().await);
}

#[tokio::test]
async fn unparseable_seed_until_is_safe_kept() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;
    record.with_tags(|tags| {
        tags.set("seed_until", "definitely not a date");
        tags.set("delete_it", "yes");
    });
    fx.pool.process_all().await;
    fx.pool.process_all().await;
    assert!(!record.is_dead(), "parse failure keeps the torrent");
    assert_eq!(fx.pool.len().await, 1);
}

#[tokio::test]
async fn watch_later_expires_after_its_grace_window() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;
    assert!(
        fx.pool
            .apply_tags("movie", vec![("watch_later".into(), "yes".into())])
            .await
    );
    let expiration = record
        .tags_snapshot()
        .get_time("watch_later_expiration")
        .expect("expiration stamped");
    assert!(expiration > Utc::now() + Duration::days(2));
    assert!(!record.is_dead());

    record.with_tags(|tags| {
        tags.set(
            "watch_later_expiration",
            TagValue::time(Utc::now() - Duration::hours(1)),
        );
    });
    fx.pool.process_all().await;
    assert!(record.is_dead(), "expired watch_later is dropped");
    assert_eq!(
        record.tags_snapshot().get_str("delete_data", ""),
        "yes",
        "expired watch_later deletes data"
    );
}

#[tokio::test]
async fn kodi_source_expires_relative_to_added() {
    let fx = fixture();
    let mut tags = Tags::new();
    tags.set("source", "kodi");
    tags.set("added", TagValue::time(Utc::now() - Duration::days(4)));
    let record = fx.add("episode", &plain_torrent("episode"), tags).await;

    fx.pool.process_all().await;
    assert!(record.is_dead(), "kodi torrents expire after three days");
    let tags = record.tags_snapshot();
    assert_eq!(tags.get_str("force_delete", ""), "yes");
    assert_eq!(tags.get_str("delete_data", ""), "yes");
}

#[tokio::test]
async fn kodi_source_survives_inside_its_window() {
    let fx = fixture();
    let mut tags = Tags::new();
    tags.set("source", "kodi");
    let record = fx.add("episode", &plain_torrent("episode"), tags).await;

    fx.pool.process_all().await;
    assert!(!record.is_dead());
    let expires = record
        .tags_snapshot()
        .get_time("kodi_expires_at")
        .expect("expiry stamped");
    assert!(expires > Utc::now());
}

#[tokio::test]
async fn connection_caps_follow_completion_and_privacy() {
    let fx = fixture();
    let public = fx.add("public", &plain_torrent("public"), Tags::new()).await;
    let private = fx
        .add(
            "private",
            &test_metainfo_bytes("private", 16_384, &[65_536], true),
            Tags::new(),
        )
        .await;

    // Complete both; completion resumes them for seeding.
    fx.backing(&public).set_bytes_completed(65_536);
    fx.backing(&private).set_bytes_completed(65_536);
    fx.pool.process_all().await;

    assert!(!public.is_paused(), "completed torrents seed");
    assert_eq!(
        fx.backing(&public).max_connections(),
        MAX_CONNS_BACKGROUND,
        "completed public torrents idle at the background cap"
    );
    assert_eq!(
        fx.backing(&private).max_connections(),
        MAX_CONNS_ACTIVE,
        "private torrents keep seeding hot"
    );
    assert_eq!(
        public.tags_snapshot().get_int("maxConnections", 0),
        i64::from(MAX_CONNS_BACKGROUND)
    );
}

#[tokio::test]
async fn incomplete_public_torrent_runs_hot_when_nothing_plays() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;
    record.resume("test");
    fx.pool.process_all().await;
    assert_eq!(fx.backing(&record).max_connections(), MAX_CONNS_ACTIVE);
    assert!(fx.backing(&record).data_download_allowed());
}

#[tokio::test]
async fn background_torrents_throttle_while_something_plays() {
    let fx = fixture();
    let playing = fx.add("playing", &plain_torrent("playing"), Tags::new()).await;
    let idle = fx.add("idle", &plain_torrent("idle"), Tags::new()).await;
    idle.resume("test");

    let file = playing.file_by_index(0).expect("file");
    let lease = file.open_reader(&playing);

    fx.pool.process_all().await;
    assert_eq!(
        fx.backing(&playing).max_connections(),
        MAX_CONNS_ACTIVE,
        "the streamed torrent runs hot"
    );
    assert_eq!(
        fx.backing(&idle).max_connections(),
        MAX_CONNS_BACKGROUND,
        "competitors are throttled during playback"
    );
    drop(lease);
}

#[tokio::test]
async fn paused_records_reassert_engine_state_every_tick() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;
    let backing = fx.backing(&record);

    // Simulate engine drift.
    backing.allow_data_download();
    backing.set_max_connections(42);

    fx.pool.process_all().await;
    assert!(record.is_paused());
    assert!(!backing.data_download_allowed(), "drift corrected");
    assert_eq!(backing.max_connections(), MAX_CONNS_PAUSED);
}

#[tokio::test]
async fn pause_and_resume_are_idempotent() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;

    record.pause("again");
    assert!(record.is_paused());
    assert!(
        record.tags_snapshot().get_str("pause_reason", "").is_empty(),
        "re-pausing does not record a reason"
    );

    record.resume("first");
    let unpaused = record.unpaused_at();
    record.resume("second");
    assert!(!record.is_paused());
    assert_eq!(
        record.unpaused_at(),
        unpaused,
        "second resume is a no-op"
    );
    assert_eq!(record.tags_snapshot().get_str("resume_reason", ""), "first");

    record.pause("stopping");
    assert!(record.is_paused());
    assert_eq!(record.tags_snapshot().get_str("pause_reason", ""), "stopping");
    assert!(record.tags_snapshot().get_str("resume_reason", "").is_empty());
}

#[tokio::test]
async fn pause_not_in_play_spares_players_completed_and_pinned() {
    let fx = fixture();
    let playing = fx.add("playing", &plain_torrent("playing"), Tags::new()).await;
    let pinned = fx.add("pinned", &plain_torrent("pinned"), Tags::new()).await;
    let done = fx.add("done", &plain_torrent("done"), Tags::new()).await;
    let idle = fx.add("idle", &plain_torrent("idle"), Tags::new()).await;

    pinned.with_tags(|tags| tags.set("force_download", "yes"));
    fx.backing(&done).set_bytes_completed(65_536);
    fx.pool.process_all().await;

    for record in [&playing, &pinned, &done, &idle] {
        record.resume("test");
    }
    let file = playing.file_by_index(0).expect("file");
    let lease = file.open_reader(&playing);

    fx.pool.pause_not_in_play().await;
    assert!(!playing.is_paused(), "in-play survives");
    assert!(!pinned.is_paused(), "force_download survives");
    assert!(!done.is_paused(), "completed survives");
    assert!(idle.is_paused(), "idle torrent paused");
    drop(lease);
}

#[tokio::test]
async fn dirty_tags_persist_with_a_suppression_window() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;
    fx.pool.process_all().await;

    let tags = record.tags_snapshot();
    assert!(tags.validated(), "in-memory map is clean after the save");
    let sidecar = PathBuf::from(tags.get_str("tags_fullpath", ""));
    assert!(sidecar.is_file());
    let reloaded = Tags::load_from(&sidecar).expect("sidecar parses");
    assert_eq!(
        reloaded.get_str("infohash", ""),
        tags.get_str("infohash", "")
    );
    assert_eq!(
        reloaded.get_str("paused", ""),
        "yes",
        "persisted state matches memory"
    );
    let descriptor = PathBuf::from(tags.get_str("fullpath", ""));
    assert!(descriptor.is_file(), "canonical torrent file written");
    assert_eq!(tags.get_str("torrent_saved", ""), "yes");
    assert!(
        record.reload_suppressed(Utc::now()),
        "own write opens the echo window"
    );
}

#[tokio::test]
async fn sidecar_reload_applies_outside_the_window() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;

    // Write a replacement sidecar by hand; no prior save, so no window.
    let sidecar = PathBuf::from(record.tags_snapshot().get_str("tags_fullpath", ""));
    let mut replacement = record.tags_snapshot();
    replacement.set("mood", "replaced");
    replacement.remove("paused");
    replacement.validate();
    replacement.save_to(&sidecar).expect("write sidecar");

    fx.pool.reload_tags(&sidecar).await;
    let tags = record.tags_snapshot();
    assert_eq!(tags.get_str("mood", ""), "replaced");
    assert!(tags.validated(), "reload re-validates");
    assert!(!record.is_paused(), "loaded paused state applied");
}

#[tokio::test]
async fn sidecar_reload_is_suppressed_right_after_own_write() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;
    fx.pool.process_all().await;

    let sidecar = PathBuf::from(record.tags_snapshot().get_str("tags_fullpath", ""));
    let mut replacement = record.tags_snapshot();
    replacement.set("mood", "should-not-land");
    replacement.save_to(&sidecar).expect("write sidecar");

    fx.pool.reload_tags(&sidecar).await;
    assert_eq!(
        record.tags_snapshot().get_str("mood", ""),
        "",
        "reload within the echo window is skipped"
    );
}

#[tokio::test]
async fn transfer_totals_accumulate_from_persisted_baseline() {
    let fx = fixture();
    let mut seed = Tags::new();
    seed.set("downloaded_bytes", 40_i64);
    seed.set("upload_bytes", 7_i64);
    let record = fx.add("movie", &plain_torrent("movie"), seed).await;
    let backing = fx.backing(&record);

    backing.set_stats(SwarmStats {
        connected_seeders: 3,
        active_peers: 5,
        bytes_read_useful: 100,
        bytes_written: 10,
    });
    fx.pool.process_all().await;
    let tags = record.tags_snapshot();
    assert_eq!(tags.get_int("downloaded_bytes", 0), 140);
    assert_eq!(tags.get_int("upload_bytes", 0), 17);

    backing.set_stats(SwarmStats {
        connected_seeders: 3,
        active_peers: 5,
        bytes_read_useful: 250,
        bytes_written: 30,
    });
    fx.pool.process_all().await;
    let tags = record.tags_snapshot();
    assert_eq!(tags.get_int("downloaded_bytes", 0), 290, "baseline is snapshotted once");
    assert_eq!(tags.get_int("upload_bytes", 0), 37);
}

#[tokio::test]
async fn deleted_descriptor_marks_and_reaps_the_record() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;
    let fullpath = PathBuf::from(record.tags_snapshot().get_str("fullpath", ""));

    fx.pool
        .handle_event(WatchEvent::TorrentFileRemoved {
            category: fx.category.clone(),
            file: "movie.torrent".to_string(),
            fullpath,
        })
        .await;
    assert!(record.is_dead(), "paused record drops on the same pass");
    assert!(fx.pool.is_empty().await);
}

#[tokio::test]
async fn category_removal_leaves_active_records_alone() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;
    let file = record.file_by_index(0).expect("file");
    let lease = file.open_reader(&record);

    fx.pool
        .handle_event(WatchEvent::CategoryRemoved {
            category: fx.category.clone(),
        })
        .await;
    assert_eq!(fx.pool.len().await, 1, "record survives category removal");
    assert_eq!(record.active_readers(), 1, "stream is untouched");
    drop(lease);
}

#[tokio::test]
async fn descriptor_files_on_disk_are_ingested_with_their_sidecars() {
    let fx = fixture();
    let bytes = plain_torrent("movie");
    let descriptor = fx.category.fullpath.join("movie.torrent");
    fs::write(&descriptor, &bytes).expect("write descriptor");

    let mut sidecar = Tags::new();
    sidecar.set("watch_later", "yes");
    sidecar.validate();
    sidecar
        .save_to(&fx.category.fullpath.join("movie.torrent.tags.yaml"))
        .expect("write sidecar");

    let record = fx
        .pool
        .add_torrent_from_file(&fx.category, "movie.torrent", &descriptor)
        .await
        .expect("ingest");
    let tags = record.tags_snapshot();
    assert_eq!(tags.get_str("watch_later", ""), "yes", "sidecar overlays");
    assert_eq!(tags.get_str("source", ""), "from_file");
    assert!(
        fx.backing(&record).data_verify_requested(),
        "existing payload is re-verified"
    );
}

#[tokio::test]
async fn magnet_descriptors_resolve_through_the_bootstrap() {
    let fx = fixture();
    let bytes = plain_torrent("movie");
    let uri = "magnet:?xt=urn:btih:feedfacefeedfacefeedfacefeedfacefeedface";
    fx.resolver.register(uri, bytes);

    let descriptor = fx.category.fullpath.join("movie.magnet");
    fs::write(&descriptor, format!("{uri}\n")).expect("write magnet");

    let record = fx
        .pool
        .add_magnet_file(&fx.category, "movie.magnet", &descriptor)
        .await
        .expect("magnet ingest");
    assert_eq!(record.name(), "movie");
    assert_eq!(record.tags_snapshot().get_str("magnet", ""), uri);

    let found = fx.pool.get(uri).await.expect("lookup by magnet");
    assert!(Arc::ptr_eq(&found, &record));
}

#[tokio::test]
async fn category_scan_ingests_existing_descriptors() {
    let fx = fixture();
    fs::write(
        fx.category.fullpath.join("existing.torrent"),
        plain_torrent("existing"),
    )
    .expect("write");
    fs::write(fx.category.fullpath.join("notes.txt"), b"ignore me").expect("write");

    fx.pool
        .handle_event(WatchEvent::CategoryCreated {
            category: fx.category.clone(),
        })
        .await;
    assert_eq!(fx.pool.len().await, 1);
    assert!(fx.pool.get("existing").await.is_some());
}

#[tokio::test]
async fn completion_milestone_is_recorded_once() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;
    let backing = fx.backing(&record);
    record.resume("test download");
    // Let the progress tracker task subscribe before pieces start landing.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    backing.set_stats(SwarmStats {
        connected_seeders: 9,
        ..SwarmStats::default()
    });
    backing.set_bytes_completed(65_536);
    backing.emit_piece(3, true);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let tags = record.tags_snapshot();
    assert!(
        matches!(tags.get("completed"), Some(TagValue::Time(_))),
        "completion timestamp recorded, got {:?}",
        tags.get("completed")
    );
    assert!(tags.get_int("total_time", -1) >= 0);
    assert!(tags.get("last_rate").is_some());
    assert_eq!(tags.get_int("max_seeders", 0), 9);

    // The marker survives later reconciliation passes.
    fx.pool.process_all().await;
    assert!(matches!(
        record.tags_snapshot().get("completed"),
        Some(TagValue::Time(_))
    ));
}

#[tokio::test]
async fn torrent_info_reflects_live_state() {
    let fx = fixture();
    let record = fx.add("movie", &plain_torrent("movie"), Tags::new()).await;
    let backing = fx.backing(&record);
    backing.set_bytes_completed(32_768);
    backing.set_stats(SwarmStats {
        connected_seeders: 4,
        active_peers: 11,
        bytes_read_useful: 32_768,
        bytes_written: 1_024,
    });

    let info = record.torrent_info();
    assert_eq!(info.name, "movie");
    assert_eq!(info.size, 65_536);
    assert_eq!(info.files_count, 1);
    assert_eq!(info.completion, 50);
    assert!(!info.completed);
    assert_eq!(info.seeders, 4);
    assert_eq!(info.leechers, 11);
    assert_eq!(info.bytes_downloaded, 32_768);
    assert_eq!(info.bytes_uploaded, 1_024);
    assert!(info.paused);
    assert_eq!(info.open_plays, 0);

    let listed = fx.pool.list_info().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "movie");
}

#[tokio::test]
async fn watch_later_listing_filters_by_tag() {
    let fx = fixture();
    let _keeper = fx.add("keeper", &plain_torrent("keeper"), Tags::new()).await;
    let flagged = fx.add("flagged", &plain_torrent("flagged"), Tags::new()).await;
    flagged.with_tags(|tags| tags.set("watch_later", "yes"));

    let listed = fx.pool.watch_later_info().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "flagged");
}
