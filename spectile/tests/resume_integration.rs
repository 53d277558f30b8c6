//! Integration tests for resumable runs.
//!
//! These tests drive complete runs through `RunCoordinator` against real
//! files in a temporary directory and check what repeated runs do:
//! - idempotence of a finished image
//! - resuming after failed or corrupt sections
//! - bands written without a ledger update
//! - purging tiles when the section size changes
//! - overwrite, abort and stack-only modes
//!
//! Run with: `cargo test --test resume_integration`

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{Array3, ArrayView2};
use tempfile::TempDir;

use spectile::config::{FailurePolicy, RunConfig, Trigger, WorkerCount};
use spectile::coordinator::{RunCoordinator, RunSummary};
use spectile::features::BlockStatsComputer;
use spectile::grid::SectionWindow;
use spectile::ledger::{StatusLedger, TileStatus};
use spectile::mosaic::VrtMosaicBuilder;
use spectile::params::ParameterContext;
use spectile::raster::{
    Placement, RasterError, RasterInfo, RasterResult, RasterSpec, RasterStore, TileRasterStore,
};
use spectile::RunError;

// ============================================================================
// Helpers
// ============================================================================

const ROWS: usize = 12;
const COLS: usize = 10;
const BANDS: usize = 3;

/// Writes a 3-band 12x10 input image and returns a config over it
/// (section size 4, so a 3x3 grid).
fn setup(dir: &TempDir, triggers: Vec<Trigger>) -> RunConfig {
    let input = dir.path().join("scene.stl");
    let image = Array3::from_shape_fn((BANDS, ROWS, COLS), |(b, r, c)| {
        (b as f32 + 1.0) * (r as f32 * 0.5 + c as f32)
    });
    TileRasterStore::new()
        .write_stack(&input, image.view(), Placement::default())
        .unwrap();

    RunConfig::new(&input, dir.path().join("out"))
        .with_triggers(triggers)
        .with_scales(vec![2, 4])
        .with_section_size(4)
        .with_workers(WorkerCount::Fixed(2))
}

fn context(config: &RunConfig) -> ParameterContext {
    ParameterContext::new(config, ROWS, COLS, BANDS)
}

fn tile_path(config: &RunConfig, counter: usize) -> PathBuf {
    context(config).section_target(counter).unwrap().path
}

fn ledger(config: &RunConfig) -> StatusLedger {
    StatusLedger::load(&config.status_file()).unwrap().unwrap()
}

fn run_with(config: &RunConfig, store: Arc<dyn RasterStore>) -> Result<RunSummary, RunError> {
    RunCoordinator::new(
        config.clone(),
        store.clone(),
        Arc::new(BlockStatsComputer::new()),
        Arc::new(VrtMosaicBuilder::new(store)),
    )
    .run()
}

fn run(config: &RunConfig) -> RunSummary {
    RunCoordinator::with_defaults(config.clone()).run().unwrap()
}

/// Store wrapper that injects faults for tiles whose name contains `marker`.
#[derive(Default)]
struct FaultyStore {
    inner: TileRasterStore,
    marker: String,
    /// Fail every band write to matching tiles.
    fail_writes: bool,
    /// Report band 1 of matching tiles as corrupt, once.
    corrupt_once: AtomicBool,
    /// Bands reported corrupt on the input image.
    corrupt_input: Vec<usize>,
}

impl FaultyStore {
    fn failing(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
            fail_writes: true,
            ..Self::default()
        }
    }

    fn corrupting_once(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
            corrupt_once: AtomicBool::new(true),
            ..Self::default()
        }
    }

    fn matches(&self, path: &Path) -> bool {
        !self.marker.is_empty() && path.to_string_lossy().contains(&self.marker)
    }

    fn is_input(path: &Path) -> bool {
        path.file_name().map(|n| n == "scene.stl").unwrap_or(false)
    }
}

impl RasterStore for FaultyStore {
    fn info(&self, path: &Path) -> RasterResult<RasterInfo> {
        self.inner.info(path)
    }

    fn read_window(
        &self,
        path: &Path,
        bands: &[usize],
        window: SectionWindow,
    ) -> RasterResult<Array3<f32>> {
        self.inner.read_window(path, bands, window)
    }

    fn create(&self, path: &Path, spec: &RasterSpec) -> RasterResult<()> {
        self.inner.create(path, spec)
    }

    fn write_band(&self, path: &Path, band: usize, data: ArrayView2<'_, f32>) -> RasterResult<()> {
        if self.fail_writes && self.matches(path) {
            return Err(RasterError::Io {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.write_band(path, band, data)
    }

    fn corrupted_bands(&self, path: &Path, bands: &[usize]) -> RasterResult<Vec<usize>> {
        if Self::is_input(path) && !self.corrupt_input.is_empty() {
            return Ok(self.corrupt_input.clone());
        }
        if self.matches(path) && bands.contains(&1) && self.corrupt_once.swap(false, Ordering::SeqCst) {
            return Ok(vec![1]);
        }
        self.inner.corrupted_bands(path, bands)
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_second_identical_run_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(&dir, vec![Trigger::Mean, Trigger::Ndvi]).with_vegetation_bands(1, 3);

    let first = run(&config);
    assert!(first.is_finished());
    assert_eq!(first.complete, 18);

    let mosaic = config.mosaic_path();
    let ledger_bytes = fs::read(config.status_file()).unwrap();
    let tile_bytes = fs::read(tile_path(&config, 5)).unwrap();
    let mosaic_bytes = fs::read(&mosaic).unwrap();
    let mosaic_mtime = fs::metadata(&mosaic).unwrap().modified().unwrap();

    let second = run(&config);
    assert!(second.already_finished);
    assert_eq!(second.batches, 0);
    assert_eq!(second.mosaic, Some(mosaic.clone()));

    assert_eq!(fs::read(config.status_file()).unwrap(), ledger_bytes);
    assert_eq!(fs::read(tile_path(&config, 5)).unwrap(), tile_bytes);
    assert_eq!(fs::read(&mosaic).unwrap(), mosaic_bytes);
    assert_eq!(fs::metadata(&mosaic).unwrap().modified().unwrap(), mosaic_mtime);
}

#[test]
fn test_resume_redoes_only_failed_sections() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(&dir, vec![Trigger::Mean]);

    let first = run_with(&config, Arc::new(FaultyStore::failing("sect00002"))).unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.complete, 8);
    assert_eq!(first.unfinished, 1);
    assert!(first.mosaic.is_none());
    assert!(!config.mosaic_path().exists());
    assert!(!ledger(&config).all_finished());

    let finished_tile = fs::read(tile_path(&config, 1)).unwrap();

    let second = run(&config);
    assert_eq!(second.complete, 1);
    assert_eq!(second.skipped, 8);
    assert!(second.is_finished());
    assert!(config.mosaic_path().is_file());
    assert_eq!(fs::read(tile_path(&config, 1)).unwrap(), finished_tile);

    let status = ledger(&config);
    assert!(status.all_finished());
    let tile = context(&config).tile_basename(1, 2);
    assert_eq!(status.status(&tile, Trigger::Mean), Some(TileStatus::Complete));
}

#[test]
fn test_abort_policy_stops_after_failing_batch() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(&dir, vec![Trigger::Mean, Trigger::Grad])
        .with_failure_policy(FailurePolicy::Abort);

    let err = run_with(&config, Arc::new(FaultyStore::failing("sect00003"))).unwrap_err();
    match err {
        RunError::SectionFailures {
            trigger,
            band,
            count,
        } => {
            assert_eq!(trigger, Trigger::Mean);
            assert_eq!(band, 1);
            assert_eq!(count, 1);
        }
        other => panic!("unexpected error: {other}"),
    }

    // The grad batch never ran
    let status = ledger(&config);
    let tile = context(&config).tile_basename(1, 1);
    assert_eq!(status.status(&tile, Trigger::Mean), Some(TileStatus::Complete));
    assert_eq!(status.status(&tile, Trigger::Grad), Some(TileStatus::Incomplete));
}

#[test]
fn test_section_size_change_purges_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(&dir, vec![Trigger::Mean]);
    run(&config);

    let stray = config.feas_dir().join("leftover.stl");
    fs::write(&stray, b"old").unwrap();

    let resized = config.clone().with_section_size(6);
    let summary = run(&resized);

    assert!(!stray.exists());
    assert_eq!(summary.sections, 4);
    assert_eq!(summary.complete, 4);
    assert_eq!(summary.skipped, 0);

    let status = ledger(&resized);
    assert_eq!(status.section_size(), 6);
    assert_eq!(status.tile_names().count(), 4);
    assert!(status.all_finished());
}

#[test]
fn test_corrupt_cell_is_retried_by_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(&dir, vec![Trigger::Mean, Trigger::Ndvi]).with_vegetation_bands(1, 3);
    let tile = context(&config).tile_basename(1, 1);

    let first = run_with(&config, Arc::new(FaultyStore::corrupting_once("sect00001"))).unwrap();
    assert_eq!(first.corrupt, 1);
    assert_eq!(first.unfinished, 1);
    assert!(first.mosaic.is_none());

    let status = ledger(&config);
    assert_eq!(status.status(&tile, Trigger::Mean), Some(TileStatus::Corrupt));
    assert_eq!(status.status(&tile, Trigger::Ndvi), Some(TileStatus::Complete));

    // The first trigger restarts the whole tile, so both triggers recompute
    let second = run(&config);
    assert!(second.is_finished());
    assert_eq!(second.complete, 2);
    assert_eq!(second.skipped, 16);

    let status = ledger(&config);
    assert!(status.is_tile_complete(&tile, &[Trigger::Mean, Trigger::Ndvi]));
    assert!(config.mosaic_path().is_file());
}

#[test]
fn test_written_bands_without_ledger_update_converge() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(&dir, vec![Trigger::Mean, Trigger::Grad]);
    assert!(run(&config).is_finished());

    // Mean bands landed in the file but the ledger never heard about it
    let tile = context(&config).tile_basename(1, 1);
    let mut status = ledger(&config);
    status.set_status(&tile, Trigger::Mean, TileStatus::Incomplete);
    status.set_all_finished(false);
    status.dump(&config.status_file()).unwrap();

    let store = TileRasterStore::new();
    let path = tile_path(&config, 1);
    let window = store.info(&path).unwrap().full_window();
    let grad_bands = [5, 6, 7, 8];
    let grad_before = store.read_window(&path, &grad_bands, window).unwrap();
    let mean_before = store.read_window(&path, &[1, 2, 3, 4], window).unwrap();

    let summary = run(&config);
    assert!(summary.is_finished());
    assert_eq!(summary.complete, 1);
    assert_eq!(summary.skipped, 17);
    assert!(config.mosaic_path().is_file());

    assert_eq!(store.read_window(&path, &grad_bands, window).unwrap(), grad_before);
    assert_eq!(store.read_window(&path, &[1, 2, 3, 4], window).unwrap(), mean_before);
    assert!(store.corrupted_bands(&path, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap().is_empty());

    let status = ledger(&config);
    assert!(status.all_finished());
    assert!(status.is_tile_complete(&tile, &[Trigger::Mean, Trigger::Grad]));
}

#[test]
fn test_corrupt_input_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(&dir, vec![Trigger::Mean]);
    let store = FaultyStore {
        corrupt_input: vec![2],
        ..FaultyStore::default()
    };

    let err = run_with(&config, Arc::new(store)).unwrap_err();
    assert!(matches!(err, RunError::CorruptInput { ref bands, .. } if bands == &vec![2]));
    assert!(!tile_path(&config, 1).exists());
}

#[test]
fn test_overwrite_recomputes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(&dir, vec![Trigger::Mean]);
    run(&config);

    let summary = run(&config.clone().with_overwrite(true));
    assert!(!summary.already_finished);
    assert_eq!(summary.complete, 9);
    assert_eq!(summary.skipped, 0);
    assert!(summary.is_finished());
    assert!(ledger(&config).all_finished());

    // Without overwrite the finished image is left alone
    let summary = run(&config);
    assert!(summary.already_finished);
}

#[test]
fn test_stack_only_uses_finished_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(&dir, vec![Trigger::Mean]);
    run_with(&config, Arc::new(FaultyStore::failing("sect00009"))).unwrap();
    assert!(!config.mosaic_path().exists());

    let summary = run(&config.clone().with_stack_only(true));
    assert_eq!(summary.unfinished, 1);
    assert_eq!(summary.mosaic, Some(config.mosaic_path()));

    let xml = fs::read_to_string(config.mosaic_path()).unwrap();
    // 4 mean bands, 8 finished tiles each
    assert_eq!(xml.matches("<VRTRasterBand").count(), 4);
    assert_eq!(xml.matches("<SimpleSource>").count(), 4 * 8);
    assert!(!xml.contains("sect00009"));
}

#[test]
fn test_overviews_are_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(&dir, vec![Trigger::Mean]).with_overviews(true);
    run(&config);

    let xml = fs::read_to_string(config.mosaic_path()).unwrap();
    assert!(xml.contains(">2 4 8 16</OverviewList>"));
}
