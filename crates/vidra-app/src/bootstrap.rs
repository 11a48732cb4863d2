//! Service wiring: settings, logging, the pool, its background tasks, and
//! the HTTP server.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use vidra_api::{ApiState, ResponseCache};
use vidra_config::Settings;
use vidra_controller::TorrentPool;
use vidra_torrent_core::TorrentEngine;
use vidra_torrent_core::memory::{MemoryEngine, MemoryResolver};
use vidra_watch::CategoryWatcher;

use crate::monitor;

/// Capacity of the watcher event channel; the watcher blocks when full
/// rather than dropping events.
const WATCH_CHANNEL_CAPACITY: usize = 16;

/// Resolve settings, wire every service, and run until shutdown.
///
/// # Errors
///
/// Returns configuration failures, watcher startup failures, and HTTP
/// server failures.
pub async fn run_app() -> Result<()> {
    let settings = Settings::from_env().context("resolving settings")?;
    init_logging(&settings.trace_file);
    settings.validate_layout().context("checking layout")?;
    info!(
        torrents_dir = %settings.torrents_dir.display(),
        kodi_category = %settings.kodi_category,
        "starting vidra"
    );
    // Transport settings belong to the engine adapter; the in-memory engine
    // has no sockets, so they are only surfaced here.
    debug!(
        listen_addr = %settings.listen_addr,
        local_port = settings.local_port,
        data_dir = %settings.data_dir.display(),
        temp_dir = %settings.temp_dir.display(),
        "engine transport settings"
    );

    // A deployment with a real BitTorrent stack links an adapter crate
    // implementing `TorrentEngine` and swaps it in here; the in-memory
    // engine keeps the control plane runnable end-to-end out of the box.
    // The resolver is a separate instance so transient metadata torrents
    // never touch the managed set.
    let engine = Arc::new(MemoryEngine::new());
    let resolver = Arc::new(MemoryResolver::new());
    let pool = TorrentPool::new(
        engine.clone(),
        resolver,
        settings.kodi_category.clone(),
    );

    let (watcher, events) =
        CategoryWatcher::spawn(&settings.torrents_dir, WATCH_CHANNEL_CAPACITY)
            .context("starting the descriptor watcher")?;
    let dispatcher = pool.spawn_event_dispatcher(events);
    let reconciler = pool.spawn_reconciler();

    let cache = Arc::new(ResponseCache::new(&settings.cache_dir).context("opening the cache")?);
    let sweeper = cache.spawn_sweeper();

    let initial = monitor::ExternalEndpoint::discover(&settings.port_forward_file).await;
    let watchdog = monitor::spawn(
        pool.clone(),
        engine.clone() as Arc<dyn TorrentEngine>,
        settings.port_forward_file.clone(),
        initial,
    );

    let state = ApiState::new(pool, cache, settings.kodi_category.clone());
    let addr: SocketAddr = format!("{}:{}", settings.http_addr, settings.http_port)
        .parse()
        .context("parsing the http bind address")?;

    let outcome = tokio::select! {
        served = vidra_api::serve(addr, state) => served,
        signal = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            signal.map_err(Into::into)
        }
    };

    watchdog.abort();
    sweeper.abort();
    reconciler.abort();
    dispatcher.abort();
    drop(watcher);
    engine.close().await?;
    info!("engine closed, exiting");
    outcome
}

fn init_logging(trace_file: &Path) {
    let filter = fs::read_to_string(trace_file)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map_or_else(
            || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            EnvFilter::new,
        );
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_init_is_idempotent() {
        init_logging(Path::new("/definitely/not/there"));
        init_logging(Path::new("/definitely/not/there"));
    }

    #[test]
    fn trace_file_contents_win_over_default() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let trace = tmp.path().join("trace.conf");
        fs::write(&trace, "vidra_controller=trace\n").expect("write");
        // Only exercises the parse path; the global subscriber may already
        // be installed by another test.
        init_logging(&trace);
    }
}
