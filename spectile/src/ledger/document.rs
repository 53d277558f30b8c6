//! In-memory status ledger and its YAML representation.
//!
//! # File Format
//!
//! ```text
//! ALL_FINISHED: no
//! BAND_ORDER:
//!   mean: 1-2
//!   ndvi: 3-3
//! SECTION_SIZE: 4000
//! scene__BD1_BK2_SC8_TRmean-ndvi__sect00001:
//!   mean: complete
//!   ndvi: incomplete
//! ```
//!
//! Every key other than the three bookkeeping keys is a tile basename mapping
//! trigger names to a [`TileStatus`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{LedgerError, LedgerResult};
use crate::config::Trigger;

/// Completion state of one (tile, trigger) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileStatus {
    Incomplete,
    Complete,
    Corrupt,
}

impl TileStatus {
    /// Whether the cell still needs work.
    pub fn is_unfinished(&self) -> bool {
        !matches!(self, TileStatus::Complete)
    }
}

/// `ALL_FINISHED` flag, stored as `yes`/`no`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Finished {
    Yes,
    No,
}

/// Result of a full ledger sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Cells recorded as `incomplete`.
    pub incomplete: usize,
    /// Cells recorded as `corrupt`.
    pub corrupt: usize,
    /// Expected cells with no record at all.
    pub missing: usize,
}

impl SweepReport {
    /// Total number of cells that are not `complete`.
    pub fn unfinished(&self) -> usize {
        self.incomplete + self.corrupt + self.missing
    }
}

/// Persistent record of per-(tile, trigger) completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusLedger {
    #[serde(rename = "ALL_FINISHED")]
    all_finished: Finished,

    #[serde(rename = "BAND_ORDER", default)]
    band_order: BTreeMap<String, String>,

    #[serde(rename = "SECTION_SIZE")]
    section_size: usize,

    #[serde(flatten)]
    tiles: BTreeMap<String, BTreeMap<String, TileStatus>>,
}

impl StatusLedger {
    /// Creates an empty, unfinished ledger for a section size.
    pub fn new(section_size: usize) -> Self {
        Self {
            all_finished: Finished::No,
            band_order: BTreeMap::new(),
            section_size,
            tiles: BTreeMap::new(),
        }
    }

    /// Loads a ledger from disk.
    ///
    /// Returns `Ok(None)` when the file does not exist. A file that exists but
    /// does not parse is an error, never an empty ledger.
    pub fn load(path: &Path) -> LedgerResult<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LedgerError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        serde_yml::from_str(&content)
            .map(Some)
            .map_err(|e| LedgerError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Serializes the whole ledger, replacing the file atomically.
    pub fn dump(&self, path: &Path) -> LedgerResult<()> {
        let content =
            serde_yml::to_string(self).map_err(|e| LedgerError::Serialize(e.to_string()))?;

        let io_err = |source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        // Write-then-rename so a crash never leaves a truncated ledger
        let tmp = path.with_extension("yaml.tmp");
        fs::write(&tmp, content).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    }

    pub fn all_finished(&self) -> bool {
        self.all_finished == Finished::Yes
    }

    pub fn set_all_finished(&mut self, finished: bool) {
        self.all_finished = if finished { Finished::Yes } else { Finished::No };
    }

    pub fn section_size(&self) -> usize {
        self.section_size
    }

    /// Trigger name → `"<start>-<end>"` band range.
    pub fn band_order(&self) -> &BTreeMap<String, String> {
        &self.band_order
    }

    pub fn set_band_order(&mut self, band_order: BTreeMap<String, String>) {
        self.band_order = band_order;
    }

    /// Status of one cell, if recorded.
    pub fn status(&self, tile: &str, trigger: Trigger) -> Option<TileStatus> {
        self.tiles
            .get(tile)
            .and_then(|cells| cells.get(trigger.name()))
            .copied()
    }

    /// Whether any record exists for a tile.
    pub fn has_tile(&self, tile: &str) -> bool {
        self.tiles.contains_key(tile)
    }

    /// Sets one cell.
    pub fn set_status(&mut self, tile: &str, trigger: Trigger, status: TileStatus) {
        self.tiles
            .entry(tile.to_string())
            .or_default()
            .insert(trigger.name().to_string(), status);
    }

    /// Sets every listed trigger of a tile to the same status.
    pub fn set_all(&mut self, tile: &str, triggers: &[Trigger], status: TileStatus) {
        for trigger in triggers {
            self.set_status(tile, *trigger, status);
        }
    }

    /// Drops every record for a tile.
    pub fn remove_tile(&mut self, tile: &str) -> bool {
        self.tiles.remove(tile).is_some()
    }

    /// Statuses of the listed triggers for a tile. Unrecorded triggers are
    /// reported as `incomplete`.
    pub fn statuses(&self, tile: &str, triggers: &[Trigger]) -> Vec<TileStatus> {
        triggers
            .iter()
            .map(|t| self.status(tile, *t).unwrap_or(TileStatus::Incomplete))
            .collect()
    }

    /// Tile basenames with a record.
    pub fn tile_names(&self) -> impl Iterator<Item = &str> {
        self.tiles.keys().map(String::as_str)
    }

    /// Whether every listed trigger of a tile is `complete`.
    pub fn is_tile_complete(&self, tile: &str, triggers: &[Trigger]) -> bool {
        triggers
            .iter()
            .all(|t| self.status(tile, *t) == Some(TileStatus::Complete))
    }

    /// Whether every listed cell is recorded as `complete`.
    pub fn all_complete<'a>(&self, cells: impl IntoIterator<Item = (&'a str, Trigger)>) -> bool {
        cells
            .into_iter()
            .all(|(tile, trigger)| self.status(tile, trigger) == Some(TileStatus::Complete))
    }

    /// Sweeps every recorded cell, and counts expected cells with no record.
    pub fn sweep<'a>(&self, expected: impl IntoIterator<Item = (&'a str, Trigger)>) -> SweepReport {
        let mut report = SweepReport::default();

        for cells in self.tiles.values() {
            for status in cells.values() {
                match status {
                    TileStatus::Incomplete => report.incomplete += 1,
                    TileStatus::Corrupt => report.corrupt += 1,
                    TileStatus::Complete => {}
                }
            }
        }

        for (tile, trigger) in expected {
            if self.status(tile, trigger).is_none() {
                report.missing += 1;
            }
        }

        report
    }
}
