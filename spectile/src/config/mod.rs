//! Run configuration.
//!
//! [`RunConfig`] is the single entry-point configuration for a feature
//! extraction run. It is built with defaults plus `with_*` setters and checked
//! with [`RunConfig::validate`] before any processing starts. Checks that need
//! the input image (band ranges, RGB availability) run through
//! [`RunConfig::validate_bands`] once the image has been opened.

mod trigger;

pub use trigger::Trigger;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default output block size in input pixels.
pub const DEFAULT_BLOCK: usize = 2;

/// Default statistics window sizes.
pub const DEFAULT_SCALES: [usize; 1] = [8];

/// Default nominal section size in input pixels.
pub const DEFAULT_SECTION_SIZE: usize = 8000;

/// Default 1-based red band index for vegetation indices.
pub const DEFAULT_BAND_RED: usize = 3;

/// Default 1-based near-infrared band index for vegetation indices.
pub const DEFAULT_BAND_NIR: usize = 4;

/// Pyramid levels built on the mosaic when overviews are requested.
pub const OVERVIEW_LEVELS: [u32; 4] = [2, 4, 8, 16];

/// Errors detected while validating a run configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("input image not found: {0}")]
    InputNotFound(PathBuf),

    #[error("at least one trigger is required")]
    NoTriggers,

    #[error("trigger '{0}' is listed more than once")]
    DuplicateTrigger(Trigger),

    #[error("unknown trigger '{0}'")]
    UnknownTrigger(String),

    #[error("at least one band position is required")]
    NoBandPositions,

    #[error("at least one scale is required")]
    NoScales,

    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("band {band} is out of range (image has {bands} bands)")]
    BandOutOfRange { band: usize, bands: usize },

    #[error("RGB conversion needs at least 3 bands (image has {bands})")]
    RgbUnavailable { bands: usize },
}

/// Number of concurrent section workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerCount {
    /// One worker per available CPU.
    #[default]
    All,
    /// A fixed number of workers. `Fixed(1)` processes sections sequentially.
    Fixed(usize),
}

impl WorkerCount {
    /// Maps a joblib-style job count: negative means all CPUs.
    pub fn from_jobs(n_jobs: i64) -> Self {
        if n_jobs < 0 {
            WorkerCount::All
        } else {
            WorkerCount::Fixed(n_jobs as usize)
        }
    }

    /// Resolves to a concrete thread count of at least one.
    pub fn resolve(&self) -> usize {
        match self {
            WorkerCount::All => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            WorkerCount::Fixed(n) => (*n).max(1),
        }
    }
}

/// What the coordinator does when section workers fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Log every failure and keep going; failed cells stay unfinished.
    #[default]
    Continue,
    /// Stop the run after the batch that produced failures.
    Abort,
}

/// Configuration for one feature extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Input raster.
    pub input_image: PathBuf,

    /// Directory receiving the status file, tiles and mosaic.
    pub output_dir: PathBuf,

    /// 1-based band positions processed by band-level triggers.
    pub band_positions: Vec<usize>,

    /// Convert bands 1-3 to grayscale before computing features.
    pub use_rgb: bool,

    /// Output pixel size in input pixels.
    pub block: usize,

    /// Statistics window sizes in input pixels.
    pub scales: Vec<usize>,

    /// Nominal section size in input pixels.
    pub section_size: usize,

    /// Triggers in processing order.
    pub triggers: Vec<Trigger>,

    /// Recompute cells that are already complete.
    pub overwrite: bool,

    /// Worker pool size.
    pub workers: WorkerCount,

    /// Only assemble existing tiles into the mosaic.
    pub stack_only: bool,

    /// 1-based red band for vegetation indices.
    pub band_red: usize,

    /// 1-based near-infrared band for vegetation indices.
    pub band_nir: usize,

    /// Build mosaic overviews after finishing.
    pub overviews: bool,

    /// Reaction to section failures.
    pub failure_policy: FailurePolicy,
}

impl RunConfig {
    /// Creates a configuration with defaults for everything but the paths.
    pub fn new(input_image: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_image: input_image.into(),
            output_dir: output_dir.into(),
            band_positions: vec![1],
            use_rgb: false,
            block: DEFAULT_BLOCK,
            scales: DEFAULT_SCALES.to_vec(),
            section_size: DEFAULT_SECTION_SIZE,
            triggers: vec![Trigger::Mean],
            overwrite: false,
            workers: WorkerCount::default(),
            stack_only: false,
            band_red: DEFAULT_BAND_RED,
            band_nir: DEFAULT_BAND_NIR,
            overviews: false,
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_band_positions(mut self, bands: Vec<usize>) -> Self {
        self.band_positions = bands;
        self
    }

    pub fn with_use_rgb(mut self, use_rgb: bool) -> Self {
        self.use_rgb = use_rgb;
        self
    }

    pub fn with_block(mut self, block: usize) -> Self {
        self.block = block;
        self
    }

    pub fn with_scales(mut self, scales: Vec<usize>) -> Self {
        self.scales = scales;
        self
    }

    pub fn with_section_size(mut self, section_size: usize) -> Self {
        self.section_size = section_size;
        self
    }

    pub fn with_triggers(mut self, triggers: Vec<Trigger>) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_workers(mut self, workers: WorkerCount) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_stack_only(mut self, stack_only: bool) -> Self {
        self.stack_only = stack_only;
        self
    }

    /// Sets the red and near-infrared band indices.
    pub fn with_vegetation_bands(mut self, band_red: usize, band_nir: usize) -> Self {
        self.band_red = band_red;
        self.band_nir = band_nir;
        self
    }

    pub fn with_overviews(mut self, overviews: bool) -> Self {
        self.overviews = overviews;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// File stem of the input image, used to name every derived file.
    pub fn input_stem(&self) -> String {
        self.input_image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string())
    }

    /// Path of the status ledger.
    pub fn status_file(&self) -> PathBuf {
        self.output_dir.join(format!("{}.yaml", self.input_stem()))
    }

    /// Directory holding the per-section tiles.
    pub fn feas_dir(&self) -> PathBuf {
        self.output_dir.join(format!("{}_features", self.input_stem()))
    }

    /// Path of the VRT mosaic, next to the status file.
    pub fn mosaic_path(&self) -> PathBuf {
        self.status_file().with_extension("vrt")
    }

    /// Path of the JSON parameter log.
    pub fn parameter_log(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_parameters.json", self.input_stem()))
    }

    /// Checks everything that does not require opening the input image.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.stack_only && !Path::new(&self.input_image).is_file() {
            return Err(ConfigError::InputNotFound(self.input_image.clone()));
        }
        if self.triggers.is_empty() {
            return Err(ConfigError::NoTriggers);
        }
        for (i, trigger) in self.triggers.iter().enumerate() {
            if self.triggers[..i].contains(trigger) {
                return Err(ConfigError::DuplicateTrigger(*trigger));
            }
        }
        if self.band_positions.is_empty() {
            return Err(ConfigError::NoBandPositions);
        }
        if self.scales.is_empty() {
            return Err(ConfigError::NoScales);
        }
        if self.block == 0 {
            return Err(ConfigError::Zero { name: "block" });
        }
        if self.section_size == 0 {
            return Err(ConfigError::Zero {
                name: "section size",
            });
        }
        if self.scales.contains(&0) {
            return Err(ConfigError::Zero { name: "scale" });
        }
        if self.workers == WorkerCount::Fixed(0) {
            return Err(ConfigError::Zero {
                name: "worker count",
            });
        }
        Ok(())
    }

    /// Checks band references against the input image's band count.
    pub fn validate_bands(&self, bands: usize) -> Result<(), ConfigError> {
        for &band in &self.band_positions {
            if band == 0 || band > bands {
                return Err(ConfigError::BandOutOfRange { band, bands });
            }
        }
        if self.triggers.iter().any(|t| t.is_vegetation_index()) {
            for band in [self.band_red, self.band_nir] {
                if band == 0 || band > bands {
                    return Err(ConfigError::BandOutOfRange { band, bands });
                }
            }
        }
        let needs_rgb = self.use_rgb || self.triggers.iter().any(|t| t.requires_rgb());
        if needs_rgb && bands < 3 {
            return Err(ConfigError::RgbUnavailable { bands });
        }
        Ok(())
    }
}
