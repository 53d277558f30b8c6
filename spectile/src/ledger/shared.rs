//! Process-wide ledger handle with serialized, cell-granular updates.
//!
//! Every section worker updates the same status file. A plain
//! load-modify-dump from each worker loses updates when two workers
//! interleave. [`SharedLedger`] instead runs each update as one critical
//! section:
//!
//! ```text
//! lock ─► reload from disk ─► mutate the caller's cells ─► atomic dump ─► unlock
//! ```
//!
//! The reload picks up every update committed by other workers, and the
//! caller only ever touches its own tile's cells, so no update is dropped.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::trace;

use super::{LedgerError, LedgerResult, StatusLedger};

/// Shared handle to one status file.
#[derive(Debug)]
pub struct SharedLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SharedLedger {
    /// Creates a handle for the status file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the status file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads a fresh copy of the ledger from disk.
    pub fn snapshot(&self) -> LedgerResult<StatusLedger> {
        let _guard = self.lock.lock();
        self.load_existing()
    }

    /// Replaces the ledger on disk.
    pub fn replace(&self, ledger: &StatusLedger) -> LedgerResult<()> {
        let _guard = self.lock.lock();
        ledger.dump(&self.path)
    }

    /// Applies `f` to a freshly loaded ledger and persists the result.
    ///
    /// The ledger is only written when `f` succeeds and actually changed
    /// something. `f` runs while the lock is held, so filesystem side effects
    /// tied to a status change (such as removing a tile) are ordered with
    /// respect to every other update.
    pub fn update<T, E>(&self, f: impl FnOnce(&mut StatusLedger) -> Result<T, E>) -> Result<T, E>
    where
        E: From<LedgerError>,
    {
        let _guard = self.lock.lock();

        let mut ledger = self.load_existing()?;
        let before = ledger.clone();

        let value = f(&mut ledger)?;

        if ledger != before {
            ledger.dump(&self.path)?;
            trace!(path = %self.path.display(), "Status ledger updated");
        }

        Ok(value)
    }

    fn load_existing(&self) -> LedgerResult<StatusLedger> {
        StatusLedger::load(&self.path)?.ok_or_else(|| LedgerError::Missing(self.path.clone()))
    }
}
