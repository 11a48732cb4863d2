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

//! Environment-driven settings for the vidra control plane.
//!
//! Every knob is a `TC_*` environment variable with a baked-in default; the
//! only required one is `TC_KODI_CATEGORY`. Settings are resolved once at
//! startup and passed into constructors explicitly.

use std::env;
use std::path::PathBuf;

use tracing::debug;

pub mod error;

pub use error::{ConfigError, ConfigResult};

/// Default engine state directory.
pub const DEFAULT_DATA_DIR: &str = "boltdb";
/// Default root for the category scan.
pub const DEFAULT_TORRENTS_DIR: &str = "torrents";
/// Default BitTorrent listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0";
/// Default BitTorrent local port.
pub const DEFAULT_LOCAL_PORT: u16 = 16881;
/// Default location of the forwarded-port file.
pub const DEFAULT_PORT_FORWARD_FILE: &str = "/tmp/port_forward";
/// Default HTTP bind address.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0";
/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 3003;
/// Default TTL cache directory.
pub const DEFAULT_CACHE_DIR: &str = "./cache";
/// Default trace-filter file.
pub const DEFAULT_TRACE_FILE: &str = "/trace.conf";
/// Default scratch directory for magnet bootstrap.
pub const DEFAULT_TEMP_DIR: &str = "/tmp";

/// Resolved process configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Engine state directory (`TC_DATADIR`).
    pub data_dir: PathBuf,
    /// Root directory scanned for categories (`TC_TORRENTSDIR`).
    pub torrents_dir: PathBuf,
    /// BitTorrent listen address (`TC_LISTENADDR`).
    pub listen_addr: String,
    /// BitTorrent local port (`TC_LOCALPORT`).
    pub local_port: u16,
    /// Text file holding the forwarded external port (`TC_PORTFORWARDFILE`).
    pub port_forward_file: PathBuf,
    /// HTTP bind address (`TC_HTTPADDR`).
    pub http_addr: String,
    /// HTTP port (`TC_HTTPPORT`).
    pub http_port: u16,
    /// TTL cache directory (`TC_CACHEDIR`).
    pub cache_dir: PathBuf,
    /// Category used for torrents arriving through the API (`TC_KODI_CATEGORY`).
    pub kodi_category: String,
    /// Optional tracing-filter file (`TC_TRACE`).
    pub trace_file: PathBuf,
    /// Scratch directory for the magnet bootstrap instance (`TC_TEMPDIR`).
    pub temp_dir: PathBuf,
}

impl Settings {
    /// Resolve settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRequired`] when `TC_KODI_CATEGORY` is
    /// absent or empty, and [`ConfigError::InvalidValue`] for unparseable
    /// port numbers.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Resolve settings from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Settings::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let var = |name: &str, default: &str| -> String {
            let value = lookup(name).filter(|value| !value.is_empty());
            let value = value.unwrap_or_else(|| default.to_string());
            debug!(name, value = %value, "resolved setting");
            value
        };
        let port = |name: &'static str, default: u16| -> ConfigResult<u16> {
            match lookup(name).filter(|value| !value.is_empty()) {
                None => Ok(default),
                Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    name,
                    value: raw,
                    reason: "expected a decimal port number",
                }),
            }
        };

        let kodi_category = var("TC_KODI_CATEGORY", "");
        if kodi_category.is_empty() {
            return Err(ConfigError::MissingRequired {
                name: "TC_KODI_CATEGORY",
            });
        }

        Ok(Self {
            data_dir: PathBuf::from(var("TC_DATADIR", DEFAULT_DATA_DIR)),
            torrents_dir: PathBuf::from(var("TC_TORRENTSDIR", DEFAULT_TORRENTS_DIR)),
            listen_addr: var("TC_LISTENADDR", DEFAULT_LISTEN_ADDR),
            local_port: port("TC_LOCALPORT", DEFAULT_LOCAL_PORT)?,
            port_forward_file: PathBuf::from(var("TC_PORTFORWARDFILE", DEFAULT_PORT_FORWARD_FILE)),
            http_addr: var("TC_HTTPADDR", DEFAULT_HTTP_ADDR),
            http_port: port("TC_HTTPPORT", DEFAULT_HTTP_PORT)?,
            cache_dir: PathBuf::from(var("TC_CACHEDIR", DEFAULT_CACHE_DIR)),
            kodi_category,
            trace_file: PathBuf::from(var("TC_TRACE", DEFAULT_TRACE_FILE)),
            temp_dir: PathBuf::from(var("TC_TEMPDIR", DEFAULT_TEMP_DIR)),
        })
    }

    /// Verify the on-disk layout the settings point at.
    ///
    /// The torrents root is authoritative state; refusing to start without it
    /// beats silently watching an empty tree.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotADirectory`] when the torrents root is
    /// missing or not a directory.
    pub fn validate_layout(&self) -> ConfigResult<()> {
        if !self.torrents_dir.is_dir() {
            return Err(ConfigError::NotADirectory {
                name: "TC_TORRENTSDIR",
                path: self.torrents_dir.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn kodi_category_is_required() {
        let err = Settings::from_lookup(lookup(&[])).expect_err("missing kodi category");
        assert!(matches!(
            err,
            ConfigError::MissingRequired {
                name: "TC_KODI_CATEGORY"
            }
        ));

        let err = Settings::from_lookup(lookup(&[("TC_KODI_CATEGORY", "")]))
            .expect_err("empty kodi category");
        assert!(matches!(err, ConfigError::MissingRequired { .. }));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings =
            Settings::from_lookup(lookup(&[("TC_KODI_CATEGORY", "kodi")])).expect("settings");
        assert_eq!(settings.torrents_dir, PathBuf::from(DEFAULT_TORRENTS_DIR));
        assert_eq!(settings.local_port, DEFAULT_LOCAL_PORT);
        assert_eq!(settings.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(settings.kodi_category, "kodi");
        assert_eq!(settings.temp_dir, PathBuf::from(DEFAULT_TEMP_DIR));
    }

    #[test]
    fn explicit_values_win() {
        let settings = Settings::from_lookup(lookup(&[
            ("TC_KODI_CATEGORY", "kodi"),
            ("TC_TORRENTSDIR", "/srv/torrents"),
            ("TC_HTTPPORT", "8080"),
        ]))
        .expect("settings");
        assert_eq!(settings.torrents_dir, PathBuf::from("/srv/torrents"));
        assert_eq!(settings.http_port, 8080);
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = Settings::from_lookup(lookup(&[
            ("TC_KODI_CATEGORY", "kodi"),
            ("TC_HTTPPORT", "not-a-port"),
        ]))
        .expect_err("bad port");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "TC_HTTPPORT",
                ..
            }
        ));
    }

    #[test]
    fn validate_layout_requires_torrents_dir() {
        let tmp = tempfile::tempdir().expect("tempdir");

        let missing = tmp.path().join("absent");
        let settings = Settings::from_lookup(lookup(&[
            ("TC_KODI_CATEGORY", "kodi"),
            ("TC_TORRENTSDIR", missing.to_str().unwrap()),
        ]))
        .expect("settings");
        assert!(settings.validate_layout().is_err());

        let settings = Settings::from_lookup(lookup(&[
            ("TC_KODI_CATEGORY", "kodi"),
            ("TC_TORRENTSDIR", tmp.path().to_str().unwrap()),
        ]))
        .expect("settings");
        assert!(settings.validate_layout().is_ok());
    }
}
