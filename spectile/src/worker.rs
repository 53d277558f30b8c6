//! Per-section processing.
//!
//! A [`SectionWorker`] handles one section for one (trigger, band) pass:
//!
//! ```text
//! reconcile with ledger ──skip──► SectionOutcome::Skipped
//!        │ compute
//!        ▼
//! read window ─► prepare input ─► compute features ─► reshape
//!        ─► write trigger bands ─► scan bands ─► record complete | corrupt
//! ```
//!
//! Reconciliation runs inside [`SharedLedger::update`], so any tile removal
//! it decides on happens exactly once and is ordered with every other ledger
//! update. Raster and feature errors are not handled here: they abort the
//! section and surface as [`SectionError`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Axis;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Trigger;
use crate::features::{
    evi2, ndvi, out_dims, reshape_features, rgb_to_gray, saliency, sobel_magnitude,
    FeatureComputer, FeatureError, FeatureRequest, SectionInput,
};
use crate::ledger::{LedgerError, SharedLedger, StatusLedger, TileStatus};
use crate::params::{ParameterContext, SectionTarget};
use crate::raster::{RasterError, RasterSpec, RasterStore};

/// Result of processing one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionOutcome {
    /// Every trigger of the tile was already complete.
    Skipped,
    /// Features written and verified.
    Complete,
    /// Features written but the scan found corrupt bands.
    Corrupt,
}

/// Errors that abort one section.
#[derive(Debug, Error)]
pub enum SectionError {
    #[error("section {0} is outside the grid")]
    OutOfGrid(usize),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("cannot remove tile {}: {source}", .path.display())]
    RemoveTile { path: PathBuf, source: io::Error },
}

/// Decision taken while reconciling a section with the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Skip,
    Compute,
}

/// Processes sections against shared stores.
pub struct SectionWorker {
    store: Arc<dyn RasterStore>,
    computer: Arc<dyn FeatureComputer>,
    ledger: Arc<SharedLedger>,
}

impl SectionWorker {
    pub fn new(
        store: Arc<dyn RasterStore>,
        computer: Arc<dyn FeatureComputer>,
        ledger: Arc<SharedLedger>,
    ) -> Self {
        Self {
            store,
            computer,
            ledger,
        }
    }

    /// Processes section `counter` (1-based) for the pass in `ctx`.
    pub fn process(
        &self,
        ctx: &ParameterContext,
        counter: usize,
    ) -> Result<SectionOutcome, SectionError> {
        let target = ctx
            .section_target(counter)
            .ok_or(SectionError::OutOfGrid(counter))?;

        if self.reconcile(ctx, &target)? == Action::Skip {
            debug!(
                section = counter,
                tile = %target.basename,
                trigger = %ctx.trigger,
                "Tile already complete, skipping"
            );
            return Ok(SectionOutcome::Skipped);
        }

        let input = self.prepare_input(ctx, &target)?;
        let planes = self.computer.compute(
            &input,
            &FeatureRequest {
                trigger: ctx.trigger,
                block: ctx.block,
                scales: &ctx.scales,
            },
        )?;

        let (out_rows, out_cols) = out_dims(target.window.rows, target.window.cols, ctx.block);
        let features = reshape_features(planes, out_rows, out_cols, ctx.bands_of(ctx.trigger))?;

        if !target.path.is_file() {
            self.store.create(
                &target.path,
                &RasterSpec {
                    rows: out_rows,
                    cols: out_cols,
                    bands: ctx.total_bands(),
                    placement: target.placement,
                },
            )?;
        }

        let bands = ctx.band_range(ctx.trigger);
        for (band, plane) in bands.iter().zip(features.axis_iter(Axis(0))) {
            self.store.write_band(&target.path, *band, plane)?;
        }

        let corrupted = self.store.corrupted_bands(&target.path, &bands)?;
        let (status, outcome) = if corrupted.is_empty() {
            (TileStatus::Complete, SectionOutcome::Complete)
        } else {
            warn!(
                tile = %target.basename,
                trigger = %ctx.trigger,
                bands = ?corrupted,
                "Corrupt bands after write"
            );
            (TileStatus::Corrupt, SectionOutcome::Corrupt)
        };

        self.ledger.update(|ledger| {
            ledger.set_status(&target.basename, ctx.trigger, status);
            Ok::<_, SectionError>(())
        })?;

        debug!(
            section = counter,
            tile = %target.basename,
            trigger = %ctx.trigger,
            status = ?status,
            "Section finished"
        );
        Ok(outcome)
    }

    /// Decides whether the section must be computed, seeding and resetting
    /// ledger cells and removing the tile when it has to start over.
    fn reconcile(
        &self,
        ctx: &ParameterContext,
        target: &SectionTarget,
    ) -> Result<Action, SectionError> {
        let first = ctx.is_first_trigger();
        let tile = target.basename.as_str();
        let path = target.path.as_path();

        self.ledger.update(|ledger| {
            if !path.is_file() {
                if ledger.remove_tile(tile) {
                    debug!(tile, "Dropping status of missing tile");
                }
                ledger.set_all(tile, &ctx.triggers, TileStatus::Incomplete);
                return Ok(Action::Compute);
            }

            if !ledger.has_tile(tile) {
                if first {
                    info!(tile, "Removing tile without status record");
                    remove_tile_file(path)?;
                } else {
                    warn!(tile, "Tile has no status record");
                }
                ledger.set_all(tile, &ctx.triggers, TileStatus::Incomplete);
                return Ok(Action::Compute);
            }

            let statuses = ledger.statuses(tile, &ctx.triggers);

            if statuses.contains(&TileStatus::Corrupt) {
                if first {
                    info!(tile, "Removing corrupt tile");
                    restart_tile(ledger, ctx, tile, path)?;
                } else {
                    ledger.set_status(tile, ctx.trigger, TileStatus::Incomplete);
                }
                return Ok(Action::Compute);
            }

            if statuses.contains(&TileStatus::Incomplete) {
                return Ok(Action::Compute);
            }

            if !ctx.overwrite {
                return Ok(Action::Skip);
            }

            if first {
                debug!(tile, "Overwriting finished tile");
                restart_tile(ledger, ctx, tile, path)?;
            } else {
                ledger.set_status(tile, ctx.trigger, TileStatus::Incomplete);
            }
            Ok(Action::Compute)
        })
    }

    /// Reads the section window and converts it to the trigger's input.
    fn prepare_input(
        &self,
        ctx: &ParameterContext,
        target: &SectionTarget,
    ) -> Result<SectionInput, SectionError> {
        let image = ctx.input_image.as_path();
        let window = target.window;

        let input = match ctx.trigger {
            Trigger::Ndvi | Trigger::Evi2 => {
                let pair = self
                    .store
                    .read_window(image, &[ctx.band_red, ctx.band_nir], window)?;
                let red = pair.index_axis(Axis(0), 0);
                let nir = pair.index_axis(Axis(0), 1);
                if ctx.trigger == Trigger::Ndvi {
                    SectionInput::Plane(ndvi(red, nir))
                } else {
                    SectionInput::Plane(evi2(red, nir))
                }
            }
            Trigger::Dmp => {
                let bands: Vec<usize> = (1..=ctx.input_bands).collect();
                SectionInput::Stack(self.store.read_window(image, &bands, window)?)
            }
            Trigger::Grad => {
                let rgb = self.store.read_window(image, &[1, 2, 3], window)?;
                let gray = rgb_to_gray(rgb.view());
                SectionInput::Plane(sobel_magnitude(gray.view()))
            }
            Trigger::Saliency => {
                let rgb = self.store.read_window(image, &[1, 2, 3], window)?;
                SectionInput::Plane(saliency(rgb.view()))
            }
            Trigger::Mean if ctx.use_rgb => {
                let rgb = self.store.read_window(image, &[1, 2, 3], window)?;
                SectionInput::Plane(rgb_to_gray(rgb.view()))
            }
            Trigger::Mean => {
                let band = self
                    .store
                    .read_window(image, &[ctx.band_position], window)?;
                SectionInput::Plane(band.index_axis_move(Axis(0), 0))
            }
        };

        Ok(input)
    }
}

/// Deletes a tile and marks every trigger of it incomplete.
fn restart_tile(
    ledger: &mut StatusLedger,
    ctx: &ParameterContext,
    tile: &str,
    path: &Path,
) -> Result<(), SectionError> {
    remove_tile_file(path)?;
    ledger.set_all(tile, &ctx.triggers, TileStatus::Incomplete);
    Ok(())
}

fn remove_tile_file(path: &Path) -> Result<(), SectionError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SectionError::RemoveTile {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
