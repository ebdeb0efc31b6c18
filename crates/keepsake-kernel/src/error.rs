//! Errors the memory facade hands back to its caller.
//!
//! Soft store failures never show up here; the facade logs them and carries
//! on. What remains is what a caller can act on.

use keepsake_types::error::KeepsakeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    /// A hard error from the memory layer, such as state merged into a
    /// session that was never started.
    #[error(transparent)]
    Keepsake(#[from] KeepsakeError),

    /// The database could not be opened or migrated.
    #[error("cannot open memory database at {}: {reason}", path.display())]
    Storage { path: PathBuf, reason: String },

    /// A decay pass ran past its time limit.
    #[error("decay pass exceeded {secs}s")]
    DecayTimedOut { secs: u64 },
}

impl KernelError {
    /// True when the caller should start the session and try again.
    pub fn is_session_missing(&self) -> bool {
        matches!(
            self,
            KernelError::Keepsake(KeepsakeError::SessionNotInitialized { .. })
        )
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
