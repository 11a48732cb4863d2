//! Sum-typed tag values.
//!
//! The sidecar format is dynamically typed for the human editing it; in
//! memory every value is one of four scalar shapes. Timestamps serialize as
//! RFC 2822 so a text editor can read and tweak them.

use std::fmt;

use chrono::{DateTime, Timelike, Utc};
use serde::ser::{Serialize, Serializer};

/// A single tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// Free-form text, including the `"yes"`/`"no"` flag convention.
    Str(String),
    /// Counter or metric.
    Int(i64),
    /// Native boolean (rare in practice; flags are usually `"yes"` strings).
    Bool(bool),
    /// Timestamp, persisted as RFC 2822.
    Time(DateTime<Utc>),
}

impl TagValue {
    /// Build a timestamp value truncated to whole seconds, the precision the
    /// sidecar format can round-trip.
    #[must_use]
    pub fn time(value: DateTime<Utc>) -> Self {
        Self::Time(value.with_nanosecond(0).unwrap_or(value))
    }

    /// Interpret the value as a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Interpret the value as an integer.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Interpret the value as a timestamp, parsing RFC 2822 strings too so
    /// hand-edited sidecars keep working.
    #[must_use]
    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(value) => Some(*value),
            Self::Str(value) => DateTime::parse_from_rfc2822(value)
                .ok()
                .map(|parsed| parsed.with_timezone(&Utc)),
            _ => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(value) => f.write_str(value),
            Self::Int(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Time(value) => f.write_str(&value.to_rfc2822()),
        }
    }
}

impl Serialize for TagValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Str(value) => serializer.serialize_str(value),
            Self::Int(value) => serializer.serialize_i64(*value),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Time(value) => serializer.serialize_str(&value.to_rfc2822()),
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for TagValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::time(value)
    }
}
