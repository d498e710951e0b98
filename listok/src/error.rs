//! Unified error handling for the listok core.
//!
//! Storage, serialization, generation-API and configuration failures all
//! surface as [`ListokError`]. Enrichment failures are caught by the
//! coordinator and never reach callers; trip-save failures are returned so
//! the user can retry.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Unified error type for listok operations.
#[derive(Debug, Error, uniffi::Error)]
#[uniffi(flat_error)]
pub enum ListokError {
    /// SQLite failure (quota, locked database, corrupt file)
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Schema upgrade failed
    #[error("Schema migration failed: {0}")]
    Schema(#[from] rusqlite_migration::Error),

    /// Trip or wire JSON could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Legacy key-value store I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generation API returned an error status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Generation API response was missing required content
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A collaborator did not answer in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Operation not valid in the session's current state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for listok operations.
pub type Result<T> = std::result::Result<T, ListokError>;

/// Extension trait for converting Option to ListokError.
pub trait OptionExt<T> {
    /// Convert Option to Result with an invalid-state error.
    fn ok_or_invalid_state(self, message: &str) -> Result<T>;

    /// Convert Option to Result with generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_invalid_state(self, message: &str) -> Result<T> {
        self.ok_or_else(|| ListokError::InvalidState(message.to_string()))
    }

    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| ListokError::Internal(message.to_string()))
    }
}
