//! Run orchestration and finalization.
//!
//! [`RunCoordinator::run`] drives a whole run:
//!
//! 1. validate the configuration and the input image
//! 2. load or create the status ledger, purging tiles when the section size
//!    changed
//! 3. skip everything when the ledger says the image is already finished
//! 4. for every trigger, for every band position, run one blocking section
//!    batch (trigger *T + 1* never starts before every section of *T* returned)
//! 5. sweep the ledger and build the mosaic only when no cell is unfinished
//!
//! Running the same configuration again is always safe: finished cells are
//! skipped without touching their tiles, and unfinished ones are redone.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{FailurePolicy, RunConfig, Trigger, OVERVIEW_LEVELS};
use crate::error::{RunError, RunResult};
use crate::features::{BlockStatsComputer, FeatureComputer};
use crate::ledger::{LedgerError, SharedLedger, StatusLedger};
use crate::mosaic::{MosaicBuilder, MosaicLayer, VrtMosaicBuilder};
use crate::params::{tile_band_position, write_parameter_log, ParameterContext};
use crate::raster::{RasterStore, TileRasterStore, TEMP_SUFFIX, TILE_EXTENSION};
use crate::scheduler::{CancelFlag, ParallelScheduler, ScheduleReport};
use crate::worker::SectionWorker;

/// Progress notifications emitted during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A (trigger, band) batch is about to start.
    BatchStarted {
        trigger: Trigger,
        band: usize,
        sections: usize,
    },
    /// One section of the current batch returned.
    SectionDone { index: usize },
    /// The current batch returned.
    BatchFinished { trigger: Trigger, band: usize },
}

/// Callback receiving [`ProgressEvent`]s, possibly from worker threads.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Sections per batch.
    pub sections: usize,
    /// (trigger, band) batches dispatched.
    pub batches: usize,
    pub complete: usize,
    pub skipped: usize,
    pub corrupt: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Cells left `incomplete`, `corrupt` or unrecorded after the sweep.
    pub unfinished: usize,
    /// The ledger already said everything was finished; nothing was run.
    pub already_finished: bool,
    /// Mosaic path, when one exists after the run.
    pub mosaic: Option<PathBuf>,
}

impl RunSummary {
    fn absorb(&mut self, report: &ScheduleReport) {
        self.batches += 1;
        self.complete += report.complete;
        self.skipped += report.skipped;
        self.corrupt += report.corrupt;
        self.failed += report.failed();
        self.cancelled += report.cancelled;
    }

    /// True when every expected cell is complete.
    pub fn is_finished(&self) -> bool {
        self.unfinished == 0
    }
}

/// Drives a run over pluggable stores.
pub struct RunCoordinator {
    config: RunConfig,
    store: Arc<dyn RasterStore>,
    computer: Arc<dyn FeatureComputer>,
    mosaic: Arc<dyn MosaicBuilder>,
    cancel: CancelFlag,
    progress: Option<ProgressCallback>,
}

impl RunCoordinator {
    pub fn new(
        config: RunConfig,
        store: Arc<dyn RasterStore>,
        computer: Arc<dyn FeatureComputer>,
        mosaic: Arc<dyn MosaicBuilder>,
    ) -> Self {
        Self {
            config,
            store,
            computer,
            mosaic,
            cancel: CancelFlag::new(),
            progress: None,
        }
    }

    /// Uses the tile store, block statistics and the VRT mosaic.
    pub fn with_defaults(config: RunConfig) -> Self {
        let store: Arc<dyn RasterStore> = Arc::new(TileRasterStore::new());
        let mosaic = Arc::new(VrtMosaicBuilder::new(store.clone()));
        Self::new(config, store, Arc::new(BlockStatsComputer::new()), mosaic)
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs (or resumes) feature extraction and finalizes when complete.
    pub fn run(&self) -> RunResult<RunSummary> {
        let config = &self.config;
        config.validate()?;

        create_dir(&config.output_dir)?;
        create_dir(&config.feas_dir())?;

        if config.stack_only {
            return self.stack_only();
        }

        let image = self.store.info(&config.input_image)?;
        config.validate_bands(image.bands)?;

        let ctx = ParameterContext::new(config, image.rows, image.cols, image.bands);
        let ledger = Arc::new(SharedLedger::new(&ctx.status_file));
        let status = self.init_ledger(&ledger, &ctx)?;

        write_parameter_log(&config.parameter_log(), config, &ctx)?;

        info!(
            image = %config.input_image.display(),
            rows = image.rows,
            cols = image.cols,
            bands = image.bands,
            section_size = ctx.section_size,
            sections = ctx.n_sects(),
            "Starting feature extraction"
        );

        let mut summary = RunSummary {
            sections: ctx.n_sects(),
            ..RunSummary::default()
        };

        if status.all_finished() {
            info!(
                image = %config.input_image.display(),
                "Image is already finished"
            );
            summary.already_finished = true;
            let mosaic = config.mosaic_path();
            if mosaic.is_file() {
                summary.mosaic = Some(mosaic);
            } else {
                summary.mosaic = Some(self.build_mosaic(&mosaic_layers(&ctx))?);
            }
            return Ok(summary);
        }

        let scheduler =
            ParallelScheduler::new(config.workers)?.with_cancel_flag(self.cancel.clone());
        let worker = SectionWorker::new(self.store.clone(), self.computer.clone(), ledger.clone());

        'passes: for &trigger in &config.triggers {
            for &band in &config.band_positions {
                if self.cancel.is_cancelled() {
                    warn!("Run cancelled, remaining batches skipped");
                    break 'passes;
                }

                self.check_input(&config.input_image, image.bands)?;

                let pass = ctx.for_pass(trigger, band);
                let report = self.run_batch(&scheduler, &worker, &pass);
                summary.absorb(&report);

                for (index, e) in &report.failures {
                    error!(
                        section = index,
                        trigger = %trigger,
                        band,
                        error = %e,
                        "Section failed"
                    );
                }

                if !report.failures.is_empty() && config.failure_policy == FailurePolicy::Abort {
                    return Err(RunError::SectionFailures {
                        trigger,
                        band,
                        count: report.failed(),
                    });
                }
            }
        }

        self.finalize(&ledger, &ctx, summary)
    }

    /// Runs one (trigger, band) batch to completion.
    fn run_batch(
        &self,
        scheduler: &ParallelScheduler,
        worker: &SectionWorker,
        pass: &ParameterContext,
    ) -> ScheduleReport {
        let n_sects = pass.n_sects();
        info!(
            trigger = %pass.trigger,
            band = pass.band_position,
            sections = n_sects,
            workers = scheduler.workers(),
            "Processing sections"
        );
        self.notify(ProgressEvent::BatchStarted {
            trigger: pass.trigger,
            band: pass.band_position,
            sections: n_sects,
        });

        let on_done = |index: usize| self.notify(ProgressEvent::SectionDone { index });
        let report = scheduler.run(n_sects, |i| worker.process(pass, i), &on_done);

        self.notify(ProgressEvent::BatchFinished {
            trigger: pass.trigger,
            band: pass.band_position,
        });
        report
    }

    /// Loads, creates or resets the ledger for this run.
    fn init_ledger(&self, ledger: &SharedLedger, ctx: &ParameterContext) -> RunResult<StatusLedger> {
        let loaded = StatusLedger::load(ledger.path())?;

        let mut status = match &loaded {
            None => {
                debug!(path = %ledger.path().display(), "Creating status file");
                StatusLedger::new(ctx.section_size)
            }
            Some(existing) if existing.section_size() != ctx.section_size => {
                warn!(
                    previous = existing.section_size(),
                    current = ctx.section_size,
                    "Section size changed, removing existing tiles"
                );
                purge_tiles(&ctx.feas_dir)?;
                StatusLedger::new(ctx.section_size)
            }
            Some(existing) => existing.clone(),
        };

        // A finished ledger only short-circuits the run it was finished for.
        // Anything else will process, so it takes this run's band layout.
        let finished = status.all_finished()
            && !ctx.overwrite
            && status.all_complete(
                ctx.expected_cells()
                    .iter()
                    .map(|(tile, trigger)| (tile.as_str(), *trigger)),
            );
        if !finished {
            if status.all_finished() {
                debug!(
                    overwrite = ctx.overwrite,
                    "Clearing ALL_FINISHED for a run with new work"
                );
                status.set_all_finished(false);
            }
            status.set_band_order(ctx.band_order());
        }

        if loaded.as_ref() != Some(&status) {
            ledger.replace(&status)?;
        }
        Ok(status)
    }

    /// Fails when any band of the input image is corrupt.
    fn check_input(&self, input: &Path, bands: usize) -> RunResult<()> {
        let all: Vec<usize> = (1..=bands).collect();
        let corrupted = self.store.corrupted_bands(input, &all)?;
        if corrupted.is_empty() {
            Ok(())
        } else {
            Err(RunError::CorruptInput {
                path: input.to_path_buf(),
                bands: corrupted,
            })
        }
    }

    /// Sweeps the ledger and builds the mosaic when nothing is left to do.
    fn finalize(
        &self,
        ledger: &SharedLedger,
        ctx: &ParameterContext,
        mut summary: RunSummary,
    ) -> RunResult<RunSummary> {
        let cells = ctx.expected_cells();
        let sweep = ledger
            .snapshot()?
            .sweep(cells.iter().map(|(tile, trigger)| (tile.as_str(), *trigger)));
        summary.unfinished = sweep.unfinished();

        if summary.unfinished > 0 {
            let message = if summary.unfinished == 1 {
                "There was 1 corrupt or incomplete tile".to_string()
            } else {
                format!(
                    "There were {} corrupt or incomplete tiles",
                    summary.unfinished
                )
            };
            warn!(
                incomplete = sweep.incomplete,
                corrupt = sweep.corrupt,
                missing = sweep.missing,
                "{}. Re-run with the same parameters to finish the image",
                message
            );
            return Ok(summary);
        }

        ledger.update(|status| {
            status.set_all_finished(true);
            Ok::<_, LedgerError>(())
        })?;

        summary.mosaic = Some(self.build_mosaic(&mosaic_layers(ctx))?);
        info!(
            complete = summary.complete,
            skipped = summary.skipped,
            "Feature extraction finished"
        );
        Ok(summary)
    }

    /// Builds the mosaic from tiles whose every trigger is complete, without
    /// computing anything.
    fn stack_only(&self) -> RunResult<RunSummary> {
        let config = &self.config;
        let mut summary = RunSummary::default();

        let Some(status) = StatusLedger::load(&config.status_file())? else {
            warn!(
                path = %config.status_file().display(),
                "No status file, nothing to stack"
            );
            return Ok(summary);
        };

        let feas_dir = config.feas_dir();
        let mut by_band: BTreeMap<usize, Vec<PathBuf>> = BTreeMap::new();
        for tile in status
            .tile_names()
            .filter(|tile| status.is_tile_complete(tile, &config.triggers))
        {
            let path = feas_dir.join(tile);
            if !path.is_file() {
                continue;
            }
            match tile_band_position(tile) {
                Some(band) => by_band.entry(band).or_default().push(path),
                None => warn!(tile, "Tile name has no band position, left out"),
            }
        }
        let layers: Vec<MosaicLayer> = by_band
            .into_iter()
            .map(|(band, tiles)| MosaicLayer::new(band, tiles))
            .collect();

        summary.unfinished = status
            .tile_names()
            .filter(|tile| !status.is_tile_complete(tile, &config.triggers))
            .count();
        if summary.unfinished > 0 {
            warn!(
                skipped = summary.unfinished,
                "Unfinished tiles left out of the mosaic"
            );
        }

        if layers.is_empty() {
            warn!("No finished tiles to stack");
            return Ok(summary);
        }

        summary.mosaic = Some(self.build_mosaic(&layers)?);
        Ok(summary)
    }

    fn build_mosaic(&self, layers: &[MosaicLayer]) -> RunResult<PathBuf> {
        let dest = self.config.mosaic_path();
        self.mosaic.build(layers, &dest)?;
        if self.config.overviews {
            self.mosaic.build_overviews(&dest, &OVERVIEW_LEVELS)?;
        }
        Ok(dest)
    }

    fn notify(&self, event: ProgressEvent) {
        if let Some(progress) = &self.progress {
            progress(event);
        }
    }
}

/// Existing tiles of this run's configuration, one layer per band position.
fn mosaic_layers(ctx: &ParameterContext) -> Vec<MosaicLayer> {
    ctx.band_positions
        .iter()
        .map(|&band| {
            let tiles = ctx
                .band_tiles(band)
                .into_iter()
                .map(|tile| ctx.feas_dir.join(tile))
                .filter(|path| path.is_file())
                .collect();
            MosaicLayer::new(band, tiles)
        })
        .collect()
}

/// Deletes every tile in `feas_dir`, including temporaries left by
/// interrupted writes.
fn purge_tiles(feas_dir: &Path) -> RunResult<usize> {
    let dir = glob::Pattern::escape(&feas_dir.to_string_lossy());
    let mut removed = 0;

    for suffix in [TILE_EXTENSION.to_string(), format!("{TILE_EXTENSION}.{TEMP_SUFFIX}")] {
        let pattern = format!("{dir}/*.{suffix}");
        let entries = glob::glob(&pattern).map_err(|e| RunError::Io {
            path: feas_dir.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
        })?;

        for entry in entries {
            let path = entry.map_err(|e| RunError::Io {
                path: e.path().to_path_buf(),
                source: io::Error::new(e.error().kind(), e.to_string()),
            })?;
            fs::remove_file(&path).map_err(|e| RunError::Io {
                path: path.clone(),
                source: e,
            })?;
            removed += 1;
        }
    }

    info!(dir = %feas_dir.display(), removed, "Tiles purged");
    Ok(removed)
}

fn create_dir(path: &Path) -> RunResult<()> {
    fs::create_dir_all(path).map_err(|e| RunError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}
