//! Error types for configuration resolution.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Fatal configuration failures; the process refuses to start on any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable was absent or empty.
    #[error("required setting missing")]
    MissingRequired {
        /// Name of the missing variable.
        name: &'static str,
    },
    /// A variable was present but unparseable.
    #[error("invalid setting value")]
    InvalidValue {
        /// Name of the offending variable.
        name: &'static str,
        /// Raw value as found in the environment.
        value: String,
        /// Machine-readable reason for the rejection.
        reason: &'static str,
    },
    /// A path setting does not point at a directory.
    #[error("setting does not point at a directory")]
    NotADirectory {
        /// Name of the offending variable.
        name: &'static str,
        /// Resolved path that failed the check.
        path: PathBuf,
    },
}
