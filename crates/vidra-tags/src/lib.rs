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

//! Per-torrent tag store with YAML sidecar persistence.
//!
//! A tag map is the declarative interface to a managed torrent: the
//! controller reads imperative keys (`drop_it`, `watch_later`, ...) and
//! writes derived ones (`completed`, `maxConnections`, ...). The map carries
//! its own dirty bit under the distinguished `tags_updated` key; a map is
//! "validated" exactly when the on-disk sidecar reflects it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::debug;

pub mod error;
pub mod value;

pub use error::{TagError, TagResult};
pub use value::TagValue;

/// Distinguished dirty-bit key.
pub const TAGS_UPDATED: &str = "tags_updated";

/// An ordered string-keyed tag map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tags {
    map: BTreeMap<String, TagValue>,
}

impl Tags {
    /// Create an empty tag map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, dirty bit included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the map holds no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Raw lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TagValue> {
        self.map.get(name)
    }

    /// String accessor with a default for the missing-key case.
    #[must_use]
    pub fn get_str(&self, name: &str, default: &str) -> String {
        self.map
            .get(name)
            .map_or_else(|| default.to_string(), ToString::to_string)
    }

    /// Integer accessor with a default; non-numeric values fall back too.
    #[must_use]
    pub fn get_int(&self, name: &str, default: i64) -> i64 {
        self.map
            .get(name)
            .and_then(TagValue::as_int)
            .unwrap_or(default)
    }

    /// Timestamp accessor; `None` when absent or unparseable.
    #[must_use]
    pub fn get_time(&self, name: &str) -> Option<DateTime<Utc>> {
        self.map.get(name).and_then(TagValue::as_time)
    }

    /// Whether a `"yes"`-convention flag is set.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.get_str(name, "") == "yes"
    }

    /// Insert a value, marking the map dirty when the stored state changes.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<TagValue>) {
        let name = name.into();
        let value = value.into();
        if self.map.get(&name) != Some(&value) {
            self.invalidate();
        }
        self.map.insert(name, value);
    }

    /// Insert a value only when the key is absent.
    pub fn set_if_new(&mut self, name: impl Into<String>, value: impl Into<TagValue>) {
        let name = name.into();
        if !self.map.contains_key(&name) {
            self.map.insert(name, value.into());
            self.invalidate();
        }
    }

    /// Remove a key, marking the map dirty when it was present.
    pub fn remove(&mut self, name: &str) {
        if self.map.contains_key(name) {
            self.invalidate();
        }
        self.map.remove(name);
    }

    /// Iterate entries in key order.
    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = (&String, &TagValue)> {
        self.map.iter()
    }

    /// Raise the dirty bit.
    pub fn invalidate(&mut self) {
        self.map
            .insert(TAGS_UPDATED.to_string(), TagValue::Str("yes".to_string()));
    }

    /// Clear the dirty bit.
    pub fn validate(&mut self) {
        self.map.remove(TAGS_UPDATED);
    }

    /// Whether the on-disk sidecar reflects the current state.
    #[must_use]
    pub fn validated(&self) -> bool {
        !self.map.contains_key(TAGS_UPDATED)
    }

    /// Render the map as the sidecar YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if YAML serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Parse a sidecar document.
    ///
    /// Scalars map onto [`TagValue`]: booleans and integers keep their shape,
    /// strings that parse as RFC 2822 become timestamps, everything else
    /// stays text.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::Parse`] on malformed YAML.
    pub fn from_yaml_str(path: &Path, raw: &str) -> TagResult<Self> {
        let parsed: BTreeMap<String, serde_yaml::Value> =
            serde_yaml::from_str(raw).map_err(|source| TagError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let mut map = BTreeMap::new();
        for (key, value) in parsed {
            map.insert(key, from_scalar(value));
        }
        Ok(Self { map })
    }

    /// Load a sidecar from disk.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::Io`] when the file cannot be read and
    /// [`TagError::Parse`] when it is not valid YAML.
    pub fn load_from(path: &Path) -> TagResult<Self> {
        let raw =
            fs::read_to_string(path).map_err(|source| TagError::io("read", path, source))?;
        Self::from_yaml_str(path, &raw)
    }

    /// Atomically write the sidecar: a sibling temp file is renamed over the
    /// target so a watcher never observes a half-written document.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::Io`] on filesystem failures.
    pub fn save_to(&self, path: &Path) -> TagResult<()> {
        let rendered = self.to_yaml().map_err(|source| TagError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!("{file_name}.tmp"));
        fs::write(&tmp, rendered).map_err(|source| TagError::io("write", &tmp, source))?;
        fs::rename(&tmp, path).map_err(|source| TagError::io("rename", path, source))?;
        debug!(path = %path.display(), entries = self.map.len(), "sidecar saved");
        Ok(())
    }
}

impl Serialize for Tags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.map.len()))?;
        for (key, value) in &self.map {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

fn from_scalar(value: serde_yaml::Value) -> TagValue {
    match value {
        serde_yaml::Value::Bool(flag) => TagValue::Bool(flag),
        serde_yaml::Value::Number(number) => number.as_i64().map_or_else(
            || TagValue::Str(number.to_string()),
            TagValue::Int,
        ),
        serde_yaml::Value::String(text) => DateTime::parse_from_rfc2822(&text).map_or_else(
            |_| TagValue::Str(text.clone()),
            |parsed| TagValue::Time(parsed.with_timezone(&Utc)),
        ),
        other => TagValue::Str(
            serde_yaml::to_string(&other)
                .unwrap_or_default()
                .trim_end()
                .to_string(),
        ),
    }
}
