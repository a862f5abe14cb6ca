//! Settings error types.

use thiserror::Error;

/// Why `~/.huddle/settings.json` could not be turned into [`crate::HuddleSettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file exists but could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid JSON or does not match the schema.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Out-of-range port, heartbeat, limit or TTL after all overrides.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result alias for settings loading.
pub type Result<T> = std::result::Result<T, SettingsError>;
