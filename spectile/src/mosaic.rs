//! Virtual mosaic of finished tiles.
//!
//! [`VrtMosaicBuilder`] writes a GDAL-style VRT document referencing every
//! tile in place. Tiles are positioned from the placement recorded in each
//! tile, so no pixel data is copied.
//!
//! Tiles of different band positions cover the same pixels, so each
//! [`MosaicLayer`] gets its own run of mosaic bands:
//!
//! ```text
//! layer BD1 (4 bands) → mosaic bands 1-4
//! layer BD2 (4 bands) → mosaic bands 5-8
//! ```

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::raster::{RasterError, RasterInfo, RasterStore};

/// Result type for mosaic operations.
pub type MosaicResult<T> = Result<T, MosaicError>;

/// Errors that can occur while building a mosaic.
#[derive(Debug, Error)]
pub enum MosaicError {
    #[error("no tiles to mosaic")]
    NoTiles,

    #[error("failed to read tile: {0}")]
    Raster(#[from] RasterError),

    #[error("mosaic I/O failed for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{} is not a VRT mosaic", .0.display())]
    NotAMosaic(PathBuf),
}

/// Tiles computed for one band position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MosaicLayer {
    pub band_position: usize,
    pub tiles: Vec<PathBuf>,
}

impl MosaicLayer {
    pub fn new(band_position: usize, tiles: Vec<PathBuf>) -> Self {
        Self {
            band_position,
            tiles,
        }
    }
}

/// Merges tiles into one composite.
pub trait MosaicBuilder: Send + Sync {
    /// Writes a composite over `layers` to `dest`, replacing any existing
    /// one. Layers occupy consecutive band ranges in the order given.
    fn build(&self, layers: &[MosaicLayer], dest: &Path) -> MosaicResult<()>;

    /// Replaces the overview (pyramid) levels of an existing composite.
    fn build_overviews(&self, dest: &Path, levels: &[u32]) -> MosaicResult<()>;
}

/// VRT XML mosaic builder.
pub struct VrtMosaicBuilder {
    store: Arc<dyn RasterStore>,
}

impl VrtMosaicBuilder {
    pub fn new(store: Arc<dyn RasterStore>) -> Self {
        Self { store }
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// A layer with every tile's dimensions resolved.
struct DescribedLayer {
    band_position: usize,
    tiles: Vec<(PathBuf, RasterInfo)>,
}

impl DescribedLayer {
    fn bands(&self) -> usize {
        self.tiles.iter().map(|(_, i)| i.bands).max().unwrap_or(0)
    }
}

fn render_vrt(layers: &[DescribedLayer]) -> String {
    let all = || layers.iter().flat_map(|layer| layer.tiles.iter());
    let width = all()
        .map(|(_, i)| i.placement.col_offset + i.cols)
        .max()
        .unwrap_or(0);
    let height = all()
        .map(|(_, i)| i.placement.row_offset + i.rows)
        .max()
        .unwrap_or(0);

    let mut xml = String::new();
    // Writing to a String cannot fail
    let _ = writeln!(
        xml,
        "<VRTDataset rasterXSize=\"{width}\" rasterYSize=\"{height}\">"
    );

    let mut offset = 0;
    for layer in layers {
        let bands = layer.bands();
        for band in 1..=bands {
            let _ = writeln!(
                xml,
                "  <VRTRasterBand dataType=\"Float32\" band=\"{}\">",
                offset + band
            );
            let _ = writeln!(
                xml,
                "    <Description>BD{} feature {band}</Description>",
                layer.band_position
            );
            for (path, info) in layer.tiles.iter().filter(|(_, i)| i.bands >= band) {
                let _ = writeln!(xml, "    <SimpleSource>");
                let _ = writeln!(
                    xml,
                    "      <SourceFilename relativeToVRT=\"0\">{}</SourceFilename>",
                    xml_escape(&path.to_string_lossy())
                );
                let _ = writeln!(xml, "      <SourceBand>{band}</SourceBand>");
                let _ = writeln!(
                    xml,
                    "      <SrcRect xOff=\"0\" yOff=\"0\" xSize=\"{}\" ySize=\"{}\"/>",
                    info.cols, info.rows
                );
                let _ = writeln!(
                    xml,
                    "      <DstRect xOff=\"{}\" yOff=\"{}\" xSize=\"{}\" ySize=\"{}\"/>",
                    info.placement.col_offset, info.placement.row_offset, info.cols, info.rows
                );
                let _ = writeln!(xml, "    </SimpleSource>");
            }
            let _ = writeln!(xml, "  </VRTRasterBand>");
        }
        offset += bands;
    }

    xml.push_str("</VRTDataset>\n");
    xml
}

impl MosaicBuilder for VrtMosaicBuilder {
    fn build(&self, layers: &[MosaicLayer], dest: &Path) -> MosaicResult<()> {
        let mut described = Vec::with_capacity(layers.len());
        for layer in layers.iter().filter(|layer| !layer.tiles.is_empty()) {
            let mut sorted = layer.tiles.clone();
            sorted.sort();

            let tiles = sorted
                .into_iter()
                .map(|path| {
                    let info = self.store.info(&path)?;
                    Ok((path, info))
                })
                .collect::<MosaicResult<Vec<_>>>()?;

            described.push(DescribedLayer {
                band_position: layer.band_position,
                tiles,
            });
        }

        if described.is_empty() {
            return Err(MosaicError::NoTiles);
        }

        let xml = render_vrt(&described);
        fs::write(dest, xml).map_err(|e| MosaicError::Io {
            path: dest.to_path_buf(),
            source: e,
        })?;

        info!(
            mosaic = %dest.display(),
            layers = described.len(),
            tiles = described.iter().map(|l| l.tiles.len()).sum::<usize>(),
            "Mosaic written"
        );
        Ok(())
    }

    fn build_overviews(&self, dest: &Path, levels: &[u32]) -> MosaicResult<()> {
        let io_err = |source| MosaicError::Io {
            path: dest.to_path_buf(),
            source,
        };

        let xml = fs::read_to_string(dest).map_err(io_err)?;
        let Some(close) = xml.rfind("</VRTDataset>") else {
            return Err(MosaicError::NotAMosaic(dest.to_path_buf()));
        };

        // Drop any previous overview list before adding the new one
        let mut body: String = xml[..close]
            .lines()
            .filter(|line| !line.trim_start().starts_with("<OverviewList"))
            .map(|line| format!("{line}\n"))
            .collect();

        let levels_text = levels
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(
            body,
            "  <OverviewList resampling=\"average\">{levels_text}</OverviewList>"
        );
        body.push_str("</VRTDataset>\n");

        fs::write(dest, body).map_err(io_err)?;
        debug!(mosaic = %dest.display(), levels = %levels_text, "Overviews recorded");
        Ok(())
    }
}
