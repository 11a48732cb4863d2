//! External address and forwarded-port watchdog.
//!
//! The engine announces the external IPv4 and the router-forwarded port it
//! was started with; when either changes the process can only adapt by
//! restarting. Hourly, the watchdog re-reads both and, if they moved and no
//! one is playing, closes the engine and exits with a distinguished status
//! so the outer supervisor restarts with fresh parameters. Active playback
//! defers the restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use vidra_controller::TorrentPool;
use vidra_torrent_core::TorrentEngine;

/// Exit status asking the supervisor for a restart with new parameters.
pub const RESTART_EXIT_CODE: i32 = 10;

const CHECK_INTERVAL: Duration = Duration::from_secs(3_600);
const IPIFY_URL: &str = "https://api.ipify.org?format=text";

/// The externally visible endpoint the engine was configured with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalEndpoint {
    /// External IPv4, empty when discovery failed.
    pub addr: String,
    /// Forwarded port, zero when unknown.
    pub port: u16,
}

impl ExternalEndpoint {
    /// Discover the current endpoint: external IP via ipify, port from the
    /// forward file.
    pub async fn discover(port_file: &Path) -> Self {
        let client = reqwest::Client::new();
        Self {
            addr: fetch_external_ip(&client).await.unwrap_or_default(),
            port: read_forwarded_port(port_file).unwrap_or(0),
        }
    }
}

/// Spawn the hourly watchdog.
#[must_use]
pub fn spawn(
    pool: Arc<TorrentPool>,
    engine: Arc<dyn TorrentEngine>,
    port_file: PathBuf,
    initial: ExternalEndpoint,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        loop {
            tokio::time::sleep(CHECK_INTERVAL).await;
            let fresh = ExternalEndpoint {
                addr: fetch_external_ip(&client).await.unwrap_or_default(),
                port: read_forwarded_port(&port_file).unwrap_or(0),
            };
            if fresh.addr.is_empty() || fresh.port == 0 {
                debug!("endpoint discovery incomplete, retrying next hour");
                continue;
            }
            if fresh == initial {
                continue;
            }
            warn!(
                was = format!("{}:{}", initial.addr, initial.port),
                now = format!("{}:{}", fresh.addr, fresh.port),
                "external address or port changed, client needs a restart"
            );
            let plays = pool.active_plays().await;
            if plays > 0 {
                warn!(plays, "keeping client up, playback active");
                continue;
            }
            warn!("exiting to pick up the new external endpoint");
            if let Err(err) = engine.close().await {
                error!(error = %err, "engine close failed during restart");
            }
            std::process::exit(RESTART_EXIT_CODE);
        }
    })
}

/// Fetch the external IPv4 address, `None` when discovery fails.
pub async fn fetch_external_ip(client: &reqwest::Client) -> Option<String> {
    debug!("asking ipify for the external address");
    let response = match client.get(IPIFY_URL).send().await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "external ip request failed");
            return None;
        }
    };
    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => {
            error!(error = %err, "external ip response unreadable");
            return None;
        }
    };
    let body = body.trim().to_string();
    if is_ipv4(&body) {
        debug!(addr = %body, "external address resolved");
        Some(body)
    } else {
        error!(body = %body, "external ip response is not an IPv4 address");
        None
    }
}

/// Read the forwarded port from the user-maintained text file.
#[must_use]
pub fn read_forwarded_port(path: &Path) -> Option<u16> {
    match std::fs::read_to_string(path) {
        Ok(raw) => match raw.trim().parse::<u16>() {
            Ok(port) => {
                debug!(port, "forwarded port read");
                Some(port)
            }
            Err(err) => {
                error!(path = %path.display(), error = %err, "forwarded port unparseable");
                None
            }
        },
        Err(err) => {
            error!(path = %path.display(), error = %err, "forwarded port file unreadable");
            None
        }
    }
}

fn is_ipv4(candidate: &str) -> bool {
    // ipify returns a bare dotted quad on the text endpoint.
    Regex::new(r"^\d+\.\d+\.\d+\.\d+$")
        .map(|pattern| pattern.is_match(candidate))
        .unwrap_or(false)
}
