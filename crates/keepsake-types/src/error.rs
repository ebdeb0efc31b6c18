//! Shared error types for the keepsake system.

use thiserror::Error;

/// Top-level error type for the keepsake system.
#[derive(Error, Debug)]
pub enum KeepsakeError {
    /// A persistence operation against the memory or state store failed.
    #[error("Memory error: {0}")]
    Memory(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An update was applied to a session that was never initialized.
    #[error("Session not initialized: {key} ({record})")]
    SessionNotInitialized {
        /// The session key the update referenced.
        key: String,
        /// Which record was missing (`session` or `spatial`).
        record: &'static str,
    },

    /// A compare-and-swap write kept losing to concurrent writers.
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeepsakeError {
    /// Whether this error is a soft failure that callers should degrade on
    /// rather than surface. Only merge errors against uninitialized sessions
    /// are programming errors.
    pub fn is_soft(&self) -> bool {
        !matches!(self, KeepsakeError::SessionNotInitialized { .. })
    }
}

/// Alias for Result with KeepsakeError.
pub type KeepsakeResult<T> = Result<T, KeepsakeError>;
