//! Raster storage.
//!
//! The engine only talks to rasters through the [`RasterStore`] trait: report
//! dimensions, read a window of bands, create a file, write one band, and scan
//! bands for corruption. [`TileRasterStore`] is the file-backed
//! implementation used for both input images and output tiles.
//!
//! Band numbers are 1-based everywhere, matching the band ranges recorded in
//! the status ledger.

mod tile_file;

pub use tile_file::{TileRasterStore, DEFAULT_STRIP_ROWS, TEMP_SUFFIX, TILE_EXTENSION};

use std::io;
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::SectionWindow;

/// Result type for raster operations.
pub type RasterResult<T> = Result<T, RasterError>;

/// Errors that can occur during raster operations.
#[derive(Debug, Error)]
pub enum RasterError {
    /// Filesystem failure.
    #[error("raster I/O failed for {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    /// The file is not a readable raster.
    #[error("cannot decode raster {}: {reason}", .path.display())]
    Decode { path: PathBuf, reason: String },

    /// Band number outside `1..=bands`.
    #[error("band {band} is out of range (raster has {bands} bands)")]
    BandOutOfRange { band: usize, bands: usize },

    /// Read window extends past the raster.
    #[error(
        "window rows {}..{} cols {}..{} exceeds raster of {rows}x{cols}",
        .window.row_start, .window.row_end(), .window.col_start, .window.col_end()
    )]
    WindowOutOfBounds {
        window: SectionWindow,
        rows: usize,
        cols: usize,
    },

    /// Array shape does not match the raster.
    #[error("array shape {actual:?} does not match raster shape {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

/// Offset of a raster inside the mosaic, in its own pixel units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub row_offset: usize,
    pub col_offset: usize,
}

/// Dimensions reported for an existing raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterInfo {
    pub rows: usize,
    pub cols: usize,
    pub bands: usize,
    pub placement: Placement,
}

impl RasterInfo {
    /// Window covering the whole raster.
    pub fn full_window(&self) -> SectionWindow {
        SectionWindow {
            row_start: 0,
            col_start: 0,
            rows: self.rows,
            cols: self.cols,
        }
    }
}

/// Shape of a raster to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterSpec {
    pub rows: usize,
    pub cols: usize,
    pub bands: usize,
    pub placement: Placement,
}

/// Storage backend for input images and output tiles.
///
/// Implementations must tolerate concurrent readers of one file and
/// concurrent writers of different files. Writes to one file are serialized
/// by the implementation.
pub trait RasterStore: Send + Sync {
    /// Reports dimensions and placement.
    fn info(&self, path: &Path) -> RasterResult<RasterInfo>;

    /// Reads `bands` over `window` as a `(bands × rows × cols)` array.
    fn read_window(
        &self,
        path: &Path,
        bands: &[usize],
        window: SectionWindow,
    ) -> RasterResult<Array3<f32>>;

    /// Creates (or truncates) a raster with every band unwritten.
    fn create(&self, path: &Path, spec: &RasterSpec) -> RasterResult<()>;

    /// Writes one full band.
    fn write_band(&self, path: &Path, band: usize, data: ArrayView2<'_, f32>) -> RasterResult<()>;

    /// Returns the subset of `bands` that are unwritten or fail integrity
    /// checks. An unreadable file reports every requested band.
    fn corrupted_bands(&self, path: &Path, bands: &[usize]) -> RasterResult<Vec<usize>>;

    /// Creates a raster holding `data`, one band per leading-axis slice.
    fn write_stack(
        &self,
        path: &Path,
        data: ArrayView3<'_, f32>,
        placement: Placement,
    ) -> RasterResult<()> {
        let (bands, rows, cols) = data.dim();
        self.create(
            path,
            &RasterSpec {
                rows,
                cols,
                bands,
                placement,
            },
        )?;
        for (i, band) in data.axis_iter(Axis(0)).enumerate() {
            self.write_band(path, i + 1, band)?;
        }
        Ok(())
    }
}
