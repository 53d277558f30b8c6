//! Section grid partitioning.
//!
//! An image is tiled into rectangular sections in row-major order. Edge
//! sections are clamped to the image boundary, so every section is at most
//! the nominal size and the union of all sections covers the image exactly
//! once.
//!
//! ```text
//!  cols ─────────────────────►
//! ┌────────┬────────┬─────┐
//! │ 1      │ 2      │ 3   │   rows
//! ├────────┼────────┼─────┤    │
//! │ 4      │ 5      │ 6   │    │
//! ├────────┼────────┼─────┤    ▼
//! │ 7      │ 8      │ 9   │  ◄── ragged edge sections
//! └────────┴────────┴─────┘
//! ```

use std::fmt;

/// Top-left corner of one grid cell, in input pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionIndexPair {
    pub row_start: usize,
    pub col_start: usize,
}

impl fmt::Display for SectionIndexPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row_start, self.col_start)
    }
}

/// Pixel window of one section after edge clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionWindow {
    pub row_start: usize,
    pub col_start: usize,
    pub rows: usize,
    pub cols: usize,
}

impl SectionWindow {
    /// Exclusive row end.
    pub fn row_end(&self) -> usize {
        self.row_start + self.rows
    }

    /// Exclusive column end.
    pub fn col_end(&self) -> usize {
        self.col_start + self.cols
    }

    /// Number of pixels in the window.
    pub fn area(&self) -> usize {
        self.rows * self.cols
    }
}

/// Number of rows (or columns) available from `start` given a nominal
/// `size`, never reading past `total`.
pub fn n_rows_cols(start: usize, size: usize, total: usize) -> usize {
    size.min(total.saturating_sub(start))
}

/// Row-major tiling of an image into sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionGrid {
    image_rows: usize,
    image_cols: usize,
    sect_row_size: usize,
    sect_col_size: usize,
    pairs: Vec<SectionIndexPair>,
}

impl SectionGrid {
    /// Builds a grid with square sections.
    ///
    /// A zero-sized image produces an empty grid. `section_size` is clamped
    /// to at least one pixel.
    pub fn new(image_rows: usize, image_cols: usize, section_size: usize) -> Self {
        Self::with_sizes(image_rows, image_cols, section_size, section_size)
    }

    /// Builds a grid with independent row and column section sizes.
    pub fn with_sizes(
        image_rows: usize,
        image_cols: usize,
        sect_row_size: usize,
        sect_col_size: usize,
    ) -> Self {
        let sect_row_size = sect_row_size.max(1);
        let sect_col_size = sect_col_size.max(1);

        let mut pairs = Vec::new();
        for row_start in (0..image_rows).step_by(sect_row_size) {
            for col_start in (0..image_cols).step_by(sect_col_size) {
                pairs.push(SectionIndexPair {
                    row_start,
                    col_start,
                });
            }
        }

        Self {
            image_rows,
            image_cols,
            sect_row_size,
            sect_col_size,
            pairs,
        }
    }

    /// Number of sections. Used as the scheduling bound.
    pub fn n_sects(&self) -> usize {
        self.pairs.len()
    }

    /// Section corners in row-major order.
    pub fn pairs(&self) -> &[SectionIndexPair] {
        &self.pairs
    }

    pub fn sect_row_size(&self) -> usize {
        self.sect_row_size
    }

    pub fn sect_col_size(&self) -> usize {
        self.sect_col_size
    }

    /// Returns the clamped window for a section corner.
    pub fn window(&self, pair: SectionIndexPair) -> SectionWindow {
        SectionWindow {
            row_start: pair.row_start,
            col_start: pair.col_start,
            rows: n_rows_cols(pair.row_start, self.sect_row_size, self.image_rows),
            cols: n_rows_cols(pair.col_start, self.sect_col_size, self.image_cols),
        }
    }

    /// Returns the window for a 1-based section counter.
    pub fn window_for_counter(&self, counter: usize) -> Option<SectionWindow> {
        counter
            .checked_sub(1)
            .and_then(|idx| self.pairs.get(idx))
            .map(|pair| self.window(*pair))
    }

    /// Iterates all clamped windows in row-major order.
    pub fn windows(&self) -> impl Iterator<Item = SectionWindow> + '_ {
        self.pairs.iter().map(|pair| self.window(*pair))
    }
}

/// Rounds a configured section size down to a whole number of blocks.
///
/// Output tiles are written at block resolution, so a section that is not a
/// block multiple would leave fractional output pixels on tile seams.
pub fn align_section_size(section_size: usize, block: usize) -> usize {
    let block = block.max(1);
    let aligned = section_size - section_size % block;
    aligned.max(block)
}
