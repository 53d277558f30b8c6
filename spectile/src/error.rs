//! Error type for a whole run.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::config::{ConfigError, Trigger};
use crate::ledger::LedgerError;
use crate::mosaic::MosaicError;
use crate::raster::RasterError;

/// Result type for run-level operations.
pub type RunResult<T> = Result<T, RunError>;

/// Errors that stop a run.
///
/// Output-tile corruption is not among them: it is recorded in the status
/// ledger and retried by the next run.
#[derive(Debug)]
pub enum RunError {
    /// Invalid parameters, detected before any processing.
    Config(ConfigError),

    /// The status file could not be read or written.
    Ledger(LedgerError),

    /// The input image could not be opened or scanned.
    Raster(RasterError),

    /// The input image has corrupt bands.
    CorruptInput { path: PathBuf, bands: Vec<usize> },

    /// Sections failed and the failure policy is to abort.
    SectionFailures {
        trigger: Trigger,
        band: usize,
        count: usize,
    },

    /// The mosaic could not be built.
    Mosaic(MosaicError),

    /// Filesystem failure outside the ledger and the raster store.
    Io { path: PathBuf, source: io::Error },

    /// The parameter log could not be serialized.
    ParameterLog(serde_json::Error),

    /// The worker pool could not be started.
    WorkerPool(rayon::ThreadPoolBuildError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Config(e) => write!(f, "invalid configuration: {}", e),
            RunError::Ledger(e) => write!(f, "{}", e),
            RunError::Raster(e) => write!(f, "{}", e),
            RunError::CorruptInput { path, bands } => {
                let bands = bands
                    .iter()
                    .map(|b| b.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    f,
                    "input image {} is corrupt (bands {})",
                    path.display(),
                    bands
                )
            }
            RunError::SectionFailures {
                trigger,
                band,
                count,
            } => {
                write!(
                    f,
                    "{} section(s) failed for trigger '{}' on band {}",
                    count, trigger, band
                )
            }
            RunError::Mosaic(e) => write!(f, "{}", e),
            RunError::Io { path, source } => {
                write!(f, "I/O error at {}: {}", path.display(), source)
            }
            RunError::ParameterLog(e) => write!(f, "cannot write parameter log: {}", e),
            RunError::WorkerPool(e) => write!(f, "cannot start worker pool: {}", e),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Config(e) => Some(e),
            RunError::Ledger(e) => Some(e),
            RunError::Raster(e) => Some(e),
            RunError::Mosaic(e) => Some(e),
            RunError::Io { source, .. } => Some(source),
            RunError::ParameterLog(e) => Some(e),
            RunError::WorkerPool(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for RunError {
    fn from(e: ConfigError) -> Self {
        RunError::Config(e)
    }
}

impl From<LedgerError> for RunError {
    fn from(e: LedgerError) -> Self {
        RunError::Ledger(e)
    }
}

impl From<RasterError> for RunError {
    fn from(e: RasterError) -> Self {
        RunError::Raster(e)
    }
}

impl From<MosaicError> for RunError {
    fn from(e: MosaicError) -> Self {
        RunError::Mosaic(e)
    }
}

impl From<serde_json::Error> for RunError {
    fn from(e: serde_json::Error) -> Self {
        RunError::ParameterLog(e)
    }
}

impl From<rayon::ThreadPoolBuildError> for RunError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        RunError::WorkerPool(e)
    }
}
