//! Per-run parameters shared with every section worker.
//!
//! [`ParameterContext`] is built once per run from the [`RunConfig`] and the
//! input image's dimensions, then narrowed to one (trigger, band) pass with
//! [`ParameterContext::for_pass`]. Workers receive it by value and never write
//! back into it; what a worker derives for its own section is returned as a
//! [`SectionTarget`].
//!
//! # Band layout
//!
//! Every trigger owns a contiguous band range in each tile, assigned in the
//! configured trigger order starting at band 1:
//!
//! ```text
//! triggers = [mean, ndvi], scales = [8, 16]
//!
//! mean: 2 features × 2 scales = 4 bands  → 1-4
//! ndvi: 1 feature  × 2 scales = 2 bands  → 5-6
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tracing::debug;

use crate::config::{RunConfig, Trigger};
use crate::error::{RunError, RunResult};
use crate::grid::{align_section_size, SectionGrid, SectionWindow};
use crate::raster::{Placement, TILE_EXTENSION};

/// Output tile owned by one section within one band pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionTarget {
    /// 1-based row-major section counter.
    pub counter: usize,
    /// Input pixel window, clamped to the image.
    pub window: SectionWindow,
    /// Full tile path.
    pub path: PathBuf,
    /// Tile file name, the ledger key.
    pub basename: String,
    /// Position in the mosaic, in output pixels.
    pub placement: Placement,
}

/// Immutable parameters for one (trigger, band) pass.
#[derive(Debug, Clone)]
pub struct ParameterContext {
    pub input_image: PathBuf,
    pub output_dir: PathBuf,
    pub feas_dir: PathBuf,
    pub status_file: PathBuf,
    stem: String,

    pub triggers: Vec<Trigger>,
    pub band_positions: Vec<usize>,
    pub scales: Vec<usize>,
    pub block: usize,
    pub use_rgb: bool,
    pub band_red: usize,
    pub band_nir: usize,
    pub overwrite: bool,

    /// Block-aligned section size actually used for the grid.
    pub section_size: usize,
    /// Number of bands in the input image.
    pub input_bands: usize,

    /// Feature bands written per trigger.
    pub out_bands: BTreeMap<Trigger, usize>,
    /// First tile band of every trigger (1-based).
    pub band_info: BTreeMap<Trigger, usize>,

    pub grid: Arc<SectionGrid>,

    /// Trigger of the current pass.
    pub trigger: Trigger,
    /// Band position of the current pass.
    pub band_position: usize,
}

impl ParameterContext {
    /// Builds the context for an input image of `rows × cols × input_bands`.
    ///
    /// The current pass is set to the first trigger and band position.
    pub fn new(config: &RunConfig, rows: usize, cols: usize, input_bands: usize) -> Self {
        let section_size = align_section_size(config.section_size, config.block);
        if section_size != config.section_size {
            debug!(
                configured = config.section_size,
                aligned = section_size,
                block = config.block,
                "Section size aligned to block"
            );
        }

        let mut out_bands = BTreeMap::new();
        let mut band_info = BTreeMap::new();
        let mut next_band = 1;
        for &trigger in &config.triggers {
            let n = config.scales.len() * trigger.features_per_scale(input_bands);
            out_bands.insert(trigger, n);
            band_info.insert(trigger, next_band);
            next_band += n;
        }

        Self {
            input_image: config.input_image.clone(),
            output_dir: config.output_dir.clone(),
            feas_dir: config.feas_dir(),
            status_file: config.status_file(),
            stem: config.input_stem(),
            triggers: config.triggers.clone(),
            band_positions: config.band_positions.clone(),
            scales: config.scales.clone(),
            block: config.block,
            use_rgb: config.use_rgb,
            band_red: config.band_red,
            band_nir: config.band_nir,
            overwrite: config.overwrite,
            section_size,
            input_bands,
            out_bands,
            band_info,
            grid: Arc::new(SectionGrid::new(rows, cols, section_size)),
            trigger: config.triggers.first().copied().unwrap_or(Trigger::Mean),
            band_position: config.band_positions.first().copied().unwrap_or(1),
        }
    }

    /// Returns a copy narrowed to one (trigger, band) pass.
    pub fn for_pass(&self, trigger: Trigger, band_position: usize) -> Self {
        Self {
            trigger,
            band_position,
            ..self.clone()
        }
    }

    /// True when the current trigger is the first configured one.
    ///
    /// Only the first trigger of a pass may delete an existing tile; later
    /// triggers would otherwise discard bands written earlier in the run.
    pub fn is_first_trigger(&self) -> bool {
        self.triggers.first() == Some(&self.trigger)
    }

    /// Number of sections in the grid.
    pub fn n_sects(&self) -> usize {
        self.grid.n_sects()
    }

    /// Total bands of a tile, summed over every trigger.
    pub fn total_bands(&self) -> usize {
        self.out_bands.values().sum()
    }

    /// Feature bands of `trigger`.
    pub fn bands_of(&self, trigger: Trigger) -> usize {
        self.out_bands.get(&trigger).copied().unwrap_or(0)
    }

    /// Tile band numbers owned by `trigger`.
    pub fn band_range(&self, trigger: Trigger) -> Vec<usize> {
        let start = self.band_info.get(&trigger).copied().unwrap_or(1);
        (start..start + self.bands_of(trigger)).collect()
    }

    /// `BAND_ORDER` entries: trigger name → `"start-end"`.
    pub fn band_order(&self) -> BTreeMap<String, String> {
        self.triggers
            .iter()
            .map(|&t| {
                let start = self.band_info.get(&t).copied().unwrap_or(1);
                let end = start + self.bands_of(t).saturating_sub(1);
                (t.name().to_string(), format!("{start}-{end}"))
            })
            .collect()
    }

    /// Deterministic tile name for a band position and section counter.
    pub fn tile_basename(&self, band_position: usize, counter: usize) -> String {
        let scales = join(self.scales.iter().map(|s| s.to_string()));
        let triggers = join(self.triggers.iter().map(|t| t.name().to_string()));
        format!(
            "{}__BD{}_BK{}_SC{}_TR{}__sect{:05}.{}",
            self.stem, band_position, self.block, scales, triggers, counter, TILE_EXTENSION
        )
    }

    /// Resolves the tile of section `counter` for the current band position.
    pub fn section_target(&self, counter: usize) -> Option<SectionTarget> {
        let window = self.grid.window_for_counter(counter)?;
        let basename = self.tile_basename(self.band_position, counter);
        let block = self.block.max(1);

        Some(SectionTarget {
            counter,
            window,
            path: self.feas_dir.join(&basename),
            basename,
            placement: Placement {
                row_offset: window.row_start / block,
                col_offset: window.col_start / block,
            },
        })
    }

    /// Tiles of one band position, in section order.
    pub fn band_tiles(&self, band_position: usize) -> Vec<String> {
        (1..=self.n_sects())
            .map(|c| self.tile_basename(band_position, c))
            .collect()
    }

    /// Every tile this run is expected to produce, over all band positions.
    pub fn expected_tiles(&self) -> Vec<String> {
        self.band_positions
            .iter()
            .flat_map(|&band| self.band_tiles(band))
            .collect()
    }

    /// Every (tile, trigger) cell this run is expected to finish.
    pub fn expected_cells(&self) -> Vec<(String, Trigger)> {
        self.expected_tiles()
            .into_iter()
            .flat_map(|tile| self.triggers.iter().map(move |&t| (tile.clone(), t)))
            .collect()
    }
}

/// Band position encoded in a tile name (`..__BD<n>_..`).
pub fn tile_band_position(tile: &str) -> Option<usize> {
    let rest = &tile[tile.rfind("__BD")? + 4..];
    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..digits].parse().ok()
}

fn join(parts: impl Iterator<Item = String>) -> String {
    parts.collect::<Vec<_>>().join("-")
}

/// JSON record of the parameters a run was started with.
#[derive(Debug, Serialize)]
struct ParameterLog<'a> {
    version: &'static str,
    started: String,
    config: &'a RunConfig,
    section_size: usize,
    sections: usize,
    input_bands: usize,
    band_order: BTreeMap<String, String>,
}

/// Writes the parameter log, replacing any previous one.
pub fn write_parameter_log(path: &Path, config: &RunConfig, ctx: &ParameterContext) -> RunResult<()> {
    let log = ParameterLog {
        version: crate::VERSION,
        started: Local::now().to_rfc3339(),
        config,
        section_size: ctx.section_size,
        sections: ctx.n_sects(),
        input_bands: ctx.input_bands,
        band_order: ctx.band_order(),
    };

    let json = serde_json::to_string_pretty(&log)?;
    fs::write(path, json).map_err(|e| RunError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    debug!(path = %path.display(), "Parameter log written");
    Ok(())
}
