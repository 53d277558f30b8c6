//! Error types for the status ledger.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur while reading or writing the status ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Failed to read or write the status file.
    #[error("status file I/O failed for {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    /// The status file exists but is not a valid ledger.
    ///
    /// Never recovered automatically: resetting would hide which tiles were
    /// finished.
    #[error(
        "status file {} exists but could not be parsed ({reason}); remove it and re-run",
        .path.display()
    )]
    Malformed { path: PathBuf, reason: String },

    /// An update was requested before the ledger was initialised.
    #[error("status file {} has not been initialised", .0.display())]
    Missing(PathBuf),

    /// The in-memory ledger could not be serialized.
    #[error("failed to serialize status ledger: {0}")]
    Serialize(String),
}
