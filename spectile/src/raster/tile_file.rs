//! Single-file band container with strip-level random access.
//!
//! # File Layout
//!
//! ```text
//! ┌──────────┬──────────────┬──────────────┬──────────────────┬────────────────────┐
//! │ SPTILE02 │ index offset │ index length │ strip payloads … │ bincode(TileIndex) │
//! │ 8 bytes  │ u64 LE       │ u64 LE       │                  │                    │
//! └──────────┴──────────────┴──────────────┴──────────────────┴────────────────────┘
//!
//! TileIndex   { rows, cols, placement, strip_rows, bands: [Option<BandIndex>] }
//! BandIndex   { strips: [StripRecord] }
//! StripRecord { offset, len, digest: sha256(raw f32 LE bytes of the strip) }
//! ```
//!
//! Every band is cut into strips of `strip_rows` rows that are deflated and
//! hashed separately. A window read seeks to, inflates and verifies only the
//! strips it intersects, and the corruption scan walks a band one strip at a
//! time, so memory stays bounded by a strip rather than by the image.
//!
//! Writes rebuild the file into a temporary sibling, copying the strips of
//! other bands without decoding them, then rename it into place. Writes to
//! the same path are serialized by a per-path lock.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use ndarray::{s, Array3, ArrayView2};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{
    Placement, RasterError, RasterInfo, RasterResult, RasterSpec, RasterStore,
};
use crate::grid::SectionWindow;

/// File extension used for tiles written by [`TileRasterStore`].
pub const TILE_EXTENSION: &str = "stl";

/// Suffix appended to a path for its in-progress temporary sibling.
pub const TEMP_SUFFIX: &str = "tmp";

/// Rows per strip in newly created files.
pub const DEFAULT_STRIP_ROWS: usize = 256;

const MAGIC: &[u8; 8] = b"SPTILE02";
const PREFIX_LEN: u64 = 24;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StripRecord {
    offset: u64,
    len: u64,
    digest: [u8; 32],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BandIndex {
    strips: Vec<StripRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TileIndex {
    rows: usize,
    cols: usize,
    placement: Placement,
    strip_rows: usize,
    bands: Vec<Option<BandIndex>>,
}

impl TileIndex {
    fn info(&self) -> RasterInfo {
        RasterInfo {
            rows: self.rows,
            cols: self.cols,
            bands: self.bands.len(),
            placement: self.placement,
        }
    }

    fn check_band(&self, band: usize) -> RasterResult<usize> {
        if band == 0 || band > self.bands.len() {
            return Err(RasterError::BandOutOfRange {
                band,
                bands: self.bands.len(),
            });
        }
        Ok(band - 1)
    }

    fn n_strips(&self) -> usize {
        self.rows.div_ceil(self.strip_rows)
    }

    /// First row and row count of `strip`.
    fn strip_extent(&self, strip: usize) -> (usize, usize) {
        let start = strip * self.strip_rows;
        (start, self.strip_rows.min(self.rows.saturating_sub(start)))
    }
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// An open tile with its index loaded.
struct TileReader {
    file: File,
    len: u64,
    index: TileIndex,
}

impl TileReader {
    fn open(path: &Path) -> RasterResult<Self> {
        let io_err = |source| RasterError::Io {
            path: path.to_path_buf(),
            source,
        };
        let decode_err = |reason: &str| RasterError::Decode {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let mut file = File::open(path).map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len();
        if len < PREFIX_LEN {
            return Err(decode_err("missing tile header"));
        }

        let mut prefix = [0u8; PREFIX_LEN as usize];
        file.read_exact(&mut prefix).map_err(io_err)?;
        if &prefix[..MAGIC.len()] != MAGIC {
            return Err(decode_err("missing tile header"));
        }

        let index_offset = le_u64(&prefix[8..16]);
        let index_len = le_u64(&prefix[16..24]);
        let inside = index_offset
            .checked_add(index_len)
            .is_some_and(|end| index_offset >= PREFIX_LEN && end <= len);
        if !inside {
            return Err(decode_err("index lies outside the file"));
        }

        let index_len = usize::try_from(index_len).map_err(|_| decode_err("index too large"))?;
        let mut body = vec![0u8; index_len];
        file.seek(SeekFrom::Start(index_offset)).map_err(io_err)?;
        file.read_exact(&mut body).map_err(io_err)?;

        let index: TileIndex = bincode::deserialize(&body).map_err(|e| RasterError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if index.strip_rows == 0 {
            return Err(decode_err("zero strip height"));
        }
        if index
            .rows
            .checked_mul(index.cols)
            .and_then(|n| n.checked_mul(4))
            .is_none()
        {
            return Err(decode_err("dimensions overflow"));
        }

        Ok(Self { file, len, index })
    }

    /// Compressed bytes of one strip, as stored.
    fn raw_strip(&self, record: &StripRecord) -> Result<Vec<u8>, String> {
        let inside = record
            .offset
            .checked_add(record.len)
            .is_some_and(|end| record.offset >= PREFIX_LEN && end <= self.len);
        if !inside {
            return Err("strip lies outside the file".to_string());
        }

        let len = usize::try_from(record.len).map_err(|e| e.to_string())?;
        let mut bytes = vec![0u8; len];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(record.offset))
            .and_then(|_| file.read_exact(&mut bytes))
            .map_err(|e| format!("strip read failed: {e}"))?;
        Ok(bytes)
    }

    /// Inflates and verifies one strip of a band.
    fn strip_values(&self, band_idx: usize, strip: usize) -> Result<Vec<f32>, String> {
        let band = self.index.bands[band_idx]
            .as_ref()
            .ok_or_else(|| "band has not been written".to_string())?;
        let record = band
            .strips
            .get(strip)
            .ok_or_else(|| format!("strip {strip} is missing"))?;

        let compressed = self.raw_strip(record)?;
        let (_, rows) = self.index.strip_extent(strip);
        let expected = rows * self.index.cols * 4;

        let mut raw = Vec::with_capacity(expected);
        DeflateDecoder::new(compressed.as_slice())
            .take(expected as u64 + 1)
            .read_to_end(&mut raw)
            .map_err(|e| format!("inflate failed: {e}"))?;

        if raw.len() != expected {
            return Err(format!(
                "strip {strip} holds {} bytes, expected {expected}",
                raw.len()
            ));
        }

        let digest: [u8; 32] = Sha256::digest(&raw).into();
        if digest != record.digest {
            return Err(format!("strip {strip} digest mismatch"));
        }

        Ok(raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// Verifies every strip of a band.
    fn verify_band(&self, band_idx: usize) -> Result<(), String> {
        let band = self.index.bands[band_idx]
            .as_ref()
            .ok_or_else(|| "band has not been written".to_string())?;
        if band.strips.len() != self.index.n_strips() {
            return Err(format!(
                "band has {} strips, expected {}",
                band.strips.len(),
                self.index.n_strips()
            ));
        }
        (0..self.index.n_strips()).try_for_each(|strip| self.strip_values(band_idx, strip).map(drop))
    }
}

/// Builds a tile in its temporary sibling and renames it into place.
struct TileWriter {
    dest: PathBuf,
    tmp: PathBuf,
    out: BufWriter<File>,
    offset: u64,
}

impl TileWriter {
    fn create(path: &Path) -> RasterResult<Self> {
        let io_err = |source| RasterError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tmp = temp_path(path);
        let mut out = BufWriter::new(File::create(&tmp).map_err(io_err)?);
        out.write_all(MAGIC).map_err(io_err)?;
        out.write_all(&[0u8; 16]).map_err(io_err)?;

        Ok(Self {
            dest: path.to_path_buf(),
            tmp,
            out,
            offset: PREFIX_LEN,
        })
    }

    fn io_err(&self, source: io::Error) -> RasterError {
        RasterError::Io {
            path: self.dest.clone(),
            source,
        }
    }

    /// Appends a payload and returns its offset.
    fn append(&mut self, bytes: &[u8]) -> RasterResult<u64> {
        let at = self.offset;
        self.out.write_all(bytes).map_err(|e| self.io_err(e))?;
        self.offset += bytes.len() as u64;
        Ok(at)
    }

    /// Deflates one strip and appends it.
    fn append_strip(&mut self, strip: ArrayView2<'_, f32>) -> RasterResult<StripRecord> {
        let mut raw = Vec::with_capacity(strip.len() * 4);
        for v in strip.iter() {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let digest: [u8; 32] = Sha256::digest(&raw).into();

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).map_err(|e| self.io_err(e))?;
        let data = encoder.finish().map_err(|e| self.io_err(e))?;

        let offset = self.append(&data)?;
        Ok(StripRecord {
            offset,
            len: data.len() as u64,
            digest,
        })
    }

    fn finish(mut self, index: &TileIndex) -> RasterResult<()> {
        let body = bincode::serialize(index).map_err(|e| RasterError::Decode {
            path: self.dest.clone(),
            reason: e.to_string(),
        })?;
        let index_offset = self.append(&body)?;

        let mut prefix = [0u8; 16];
        prefix[..8].copy_from_slice(&index_offset.to_le_bytes());
        prefix[8..].copy_from_slice(&(body.len() as u64).to_le_bytes());
        self.out
            .seek(SeekFrom::Start(MAGIC.len() as u64))
            .and_then(|_| self.out.write_all(&prefix))
            .map_err(|e| self.io_err(e))?;

        let Self { dest, tmp, out, .. } = self;
        let io_err = |source| RasterError::Io {
            path: dest.clone(),
            source,
        };
        let file = out.into_inner().map_err(|e| io_err(e.into_error()))?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&tmp, &dest).map_err(io_err)
    }
}

/// File-backed [`RasterStore`].
#[derive(Debug)]
pub struct TileRasterStore {
    /// Per-path write locks.
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    strip_rows: usize,
}

impl Default for TileRasterStore {
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
            strip_rows: DEFAULT_STRIP_ROWS,
        }
    }
}

impl TileRasterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strip height for files this store creates. Existing files keep theirs.
    pub fn with_strip_rows(mut self, strip_rows: usize) -> Self {
        self.strip_rows = strip_rows.max(1);
        self
    }

    fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(path.to_path_buf()).or_default().value())
    }
}

impl RasterStore for TileRasterStore {
    fn info(&self, path: &Path) -> RasterResult<RasterInfo> {
        Ok(TileReader::open(path)?.index.info())
    }

    fn read_window(
        &self,
        path: &Path,
        bands: &[usize],
        window: SectionWindow,
    ) -> RasterResult<Array3<f32>> {
        let reader = TileReader::open(path)?;
        let index = &reader.index;

        if window.row_end() > index.rows || window.col_end() > index.cols {
            return Err(RasterError::WindowOutOfBounds {
                window,
                rows: index.rows,
                cols: index.cols,
            });
        }

        let mut out = Array3::<f32>::zeros((bands.len(), window.rows, window.cols));
        let first = window.row_start / index.strip_rows;
        let last = window.row_end().div_ceil(index.strip_rows);

        for (i, &band) in bands.iter().enumerate() {
            let idx = index.check_band(band)?;
            let decode_err = |reason: String| RasterError::Decode {
                path: path.to_path_buf(),
                reason: format!("band {band}: {reason}"),
            };

            if index.bands[idx].is_none() {
                return Err(decode_err("band has not been written".to_string()));
            }

            for strip in first..last {
                let (start, rows) = index.strip_extent(strip);
                let r0 = start.max(window.row_start);
                let r1 = (start + rows).min(window.row_end());
                if r0 >= r1 {
                    continue;
                }

                let values = reader.strip_values(idx, strip).map_err(decode_err)?;
                let plane = ArrayView2::from_shape((rows, index.cols), values.as_slice())
                    .map_err(|e| decode_err(e.to_string()))?;

                out.slice_mut(s![i, r0 - window.row_start..r1 - window.row_start, ..])
                    .assign(&plane.slice(s![
                        r0 - start..r1 - start,
                        window.col_start..window.col_end()
                    ]));
            }
        }

        Ok(out)
    }

    fn create(&self, path: &Path, spec: &RasterSpec) -> RasterResult<()> {
        let lock = self.path_lock(path);
        let _guard = lock.lock();

        let index = TileIndex {
            rows: spec.rows,
            cols: spec.cols,
            placement: spec.placement,
            strip_rows: self.strip_rows,
            bands: vec![None; spec.bands],
        };

        debug!(
            path = %path.display(),
            rows = spec.rows,
            cols = spec.cols,
            bands = spec.bands,
            "Creating raster"
        );
        TileWriter::create(path)?.finish(&index)
    }

    fn write_band(&self, path: &Path, band: usize, data: ArrayView2<'_, f32>) -> RasterResult<()> {
        let lock = self.path_lock(path);
        let _guard = lock.lock();

        let reader = TileReader::open(path)?;
        let idx = reader.index.check_band(band)?;
        if data.dim() != (reader.index.rows, reader.index.cols) {
            return Err(RasterError::ShapeMismatch {
                expected: (reader.index.rows, reader.index.cols),
                actual: data.dim(),
            });
        }

        let mut index = reader.index.clone();
        let mut writer = TileWriter::create(path)?;

        for (i, slot) in index.bands.iter_mut().enumerate() {
            let Some(existing) = slot.as_mut().filter(|_| i != idx) else {
                continue;
            };
            let copied = existing.strips.iter_mut().try_for_each(|record| {
                let bytes = reader
                    .raw_strip(record)
                    .map_err(|reason| RasterError::Decode {
                        path: path.to_path_buf(),
                        reason,
                    })?;
                record.offset = writer.append(&bytes)?;
                Ok::<_, RasterError>(())
            });
            match copied {
                Ok(()) => {}
                Err(RasterError::Decode { reason, .. }) => {
                    warn!(path = %path.display(), band = i + 1, reason = %reason, "Dropping unreadable band");
                    *slot = None;
                }
                Err(e) => return Err(e),
            }
        }

        let mut strips = Vec::with_capacity(index.n_strips());
        for strip in 0..index.n_strips() {
            let (start, rows) = index.strip_extent(strip);
            strips.push(writer.append_strip(data.slice(s![start..start + rows, ..]))?);
        }
        index.bands[idx] = Some(BandIndex { strips });

        writer.finish(&index)
    }

    fn corrupted_bands(&self, path: &Path, bands: &[usize]) -> RasterResult<Vec<usize>> {
        let reader = match TileReader::open(path) {
            Ok(reader) => reader,
            Err(RasterError::Decode { reason, .. }) => {
                debug!(path = %path.display(), reason = %reason, "Raster is undecodable");
                return Ok(bands.to_vec());
            }
            Err(e) => return Err(e),
        };

        let corrupted = bands
            .iter()
            .copied()
            .filter(|&band| match reader.index.check_band(band) {
                Ok(idx) => match reader.verify_band(idx) {
                    Ok(()) => false,
                    Err(reason) => {
                        debug!(path = %path.display(), band, reason = %reason, "Corrupt band");
                        true
                    }
                },
                Err(_) => true,
            })
            .collect();

        Ok(corrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, Array2};

    fn ramp(bands: usize, rows: usize, cols: usize) -> Array3<f32> {
        Array::from_shape_fn((bands, rows, cols), |(b, r, c)| {
            (b * 1000 + r * cols + c) as f32
        })
    }

    /// Flips the first payload byte of one strip.
    fn damage_strip(path: &Path, band: usize, strip: usize) {
        let reader = TileReader::open(path).unwrap();
        let record = reader.index.bands[band - 1].as_ref().unwrap().strips[strip];
        drop(reader);

        let mut bytes = fs::read(path).unwrap();
        bytes[record.offset as usize] ^= 0xFF;
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_write_stack_and_read_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.stl");
        let store = TileRasterStore::new();
        let data = ramp(3, 6, 5);

        store
            .write_stack(&path, data.view(), Placement::default())
            .unwrap();

        let info = store.info(&path).unwrap();
        assert_eq!((info.rows, info.cols, info.bands), (6, 5, 3));

        let window = SectionWindow {
            row_start: 2,
            col_start: 1,
            rows: 3,
            cols: 4,
        };
        let read = store.read_window(&path, &[3, 1], window).unwrap();
        assert_eq!(read.dim(), (2, 3, 4));
        assert_eq!(read[[0, 0, 0]], data[[2, 2, 1]]);
        assert_eq!(read[[1, 2, 3]], data[[0, 4, 4]]);
    }

    #[test]
    fn test_window_spanning_several_strips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.stl");
        let store = TileRasterStore::new().with_strip_rows(2);
        let data = ramp(2, 9, 4);
        store
            .write_stack(&path, data.view(), Placement::default())
            .unwrap();

        let window = SectionWindow {
            row_start: 1,
            col_start: 1,
            rows: 7,
            cols: 3,
        };
        let read = store.read_window(&path, &[1, 2], window).unwrap();
        let expected = data.slice(s![.., 1..8, 1..4]);
        assert_eq!(read, expected);
    }

    #[test]
    fn test_window_reads_only_intersecting_strips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.stl");
        let store = TileRasterStore::new().with_strip_rows(2);
        store
            .write_stack(&path, ramp(1, 8, 4).view(), Placement::default())
            .unwrap();
        damage_strip(&path, 1, 0);

        let below = SectionWindow {
            row_start: 4,
            col_start: 0,
            rows: 4,
            cols: 4,
        };
        assert!(store.read_window(&path, &[1], below).is_ok());

        let above = SectionWindow {
            row_start: 1,
            col_start: 0,
            rows: 2,
            cols: 4,
        };
        assert!(matches!(
            store.read_window(&path, &[1], above),
            Err(RasterError::Decode { .. })
        ));
        assert_eq!(store.corrupted_bands(&path, &[1]).unwrap(), vec![1]);
    }

    #[test]
    fn test_window_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.stl");
        let store = TileRasterStore::new();
        store
            .write_stack(&path, ramp(1, 4, 4).view(), Placement::default())
            .unwrap();

        let window = SectionWindow {
            row_start: 2,
            col_start: 0,
            rows: 3,
            cols: 4,
        };
        assert!(matches!(
            store.read_window(&path, &[1], window),
            Err(RasterError::WindowOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_band_out_of_range_and_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.stl");
        let store = TileRasterStore::new();
        let spec = RasterSpec {
            rows: 2,
            cols: 2,
            bands: 2,
            placement: Placement::default(),
        };
        store.create(&path, &spec).unwrap();

        let ok = Array2::<f32>::zeros((2, 2));
        assert!(matches!(
            store.write_band(&path, 3, ok.view()),
            Err(RasterError::BandOutOfRange { band: 3, bands: 2 })
        ));

        let wrong = Array2::<f32>::zeros((3, 2));
        assert!(matches!(
            store.write_band(&path, 1, wrong.view()),
            Err(RasterError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_unwritten_bands_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.stl");
        let store = TileRasterStore::new();
        let spec = RasterSpec {
            rows: 2,
            cols: 3,
            bands: 3,
            placement: Placement {
                row_offset: 4,
                col_offset: 8,
            },
        };
        store.create(&path, &spec).unwrap();
        store
            .write_band(&path, 2, Array2::from_elem((2, 3), 1.5).view())
            .unwrap();

        assert_eq!(store.corrupted_bands(&path, &[1, 2, 3]).unwrap(), vec![1, 3]);
        assert!(store.corrupted_bands(&path, &[2]).unwrap().is_empty());
        assert_eq!(store.info(&path).unwrap().placement.col_offset, 8);
    }

    #[test]
    fn test_rewriting_a_band_keeps_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.stl");
        let store = TileRasterStore::new().with_strip_rows(3);
        store
            .write_stack(&path, ramp(3, 7, 5).view(), Placement::default())
            .unwrap();
        let size = fs::metadata(&path).unwrap().len();

        let band = Array2::from_shape_fn((7, 5), |(r, c)| (1000 + r * 5 + c) as f32);
        store.write_band(&path, 2, band.view()).unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), size);
        assert!(store.corrupted_bands(&path, &[1, 2, 3]).unwrap().is_empty());
        let full = store.info(&path).unwrap().full_window();
        assert_eq!(store.read_window(&path, &[1, 2, 3], full).unwrap(), ramp(3, 7, 5));
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_tampered_band_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.stl");
        let store = TileRasterStore::new();
        store
            .write_stack(&path, ramp(2, 8, 8).view(), Placement::default())
            .unwrap();
        damage_strip(&path, 2, 0);

        assert_eq!(store.corrupted_bands(&path, &[1, 2]).unwrap(), vec![2]);
        assert!(matches!(
            store.read_window(&path, &[2], store.info(&path).unwrap().full_window()),
            Err(RasterError::Decode { .. })
        ));
    }

    #[test]
    fn test_truncated_file_reports_every_band() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.stl");
        let store = TileRasterStore::new();
        store
            .write_stack(&path, ramp(2, 4, 4).view(), Placement::default())
            .unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        assert_eq!(store.corrupted_bands(&path, &[1, 2]).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_garbage_file_reports_every_band() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.stl");
        fs::write(&path, b"definitely not a tile").unwrap();

        let store = TileRasterStore::new();
        assert_eq!(store.corrupted_bands(&path, &[1, 2]).unwrap(), vec![1, 2]);
        assert!(matches!(store.info(&path), Err(RasterError::Decode { .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let store = TileRasterStore::new();
        let result = store.corrupted_bands(Path::new("/nonexistent/t.stl"), &[1]);
        assert!(matches!(result, Err(RasterError::Io { .. })));
    }

    #[test]
    fn test_concurrent_band_writes_to_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.stl");
        let store = Arc::new(TileRasterStore::new());
        store
            .create(
                &path,
                &RasterSpec {
                    rows: 4,
                    cols: 4,
                    bands: 8,
                    placement: Placement::default(),
                },
            )
            .unwrap();

        let handles: Vec<_> = (1..=8)
            .map(|band| {
                let store = Arc::clone(&store);
                let path = path.clone();
                std::thread::spawn(move || {
                    let data = Array2::from_elem((4, 4), band as f32);
                    store.write_band(&path, band, data.view()).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let bands: Vec<usize> = (1..=8).collect();
        assert!(store.corrupted_bands(&path, &bands).unwrap().is_empty());
        let read = store
            .read_window(&path, &bands, store.info(&path).unwrap().full_window())
            .unwrap();
        assert_eq!(read[[6, 3, 3]], 7.0);
    }
}
