//! Feature computation for one section.
//!
//! A [`FeatureComputer`] turns a prepared section window into a flat,
//! scale-major list of statistic planes:
//!
//! ```text
//! [scale 1: feature 1, feature 2, ...][scale 2: feature 1, feature 2, ...]
//! ```
//!
//! Each plane has the section's output dimensions (one value per block).
//! [`reshape_features`] validates the list against the declared band count and
//! stacks it into the `(features × rows × cols)` array written to the tile.

mod indices;
mod reshape;
mod stats;

pub use indices::{evi2, ndvi, rgb_to_gray, saliency, sobel_magnitude};
pub use reshape::reshape_features;
pub use stats::BlockStatsComputer;

use ndarray::{Array2, Array3};
use thiserror::Error;

use crate::config::Trigger;

/// Errors produced while computing or reshaping features.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeatureError {
    /// The computer received the wrong kind of input for a trigger.
    #[error("trigger '{trigger}' cannot use this input: {reason}")]
    UnsupportedInput { trigger: Trigger, reason: String },

    /// Number of feature planes differs from the declared band count.
    #[error("expected {expected} feature planes, got {actual}")]
    Count { expected: usize, actual: usize },

    /// A feature plane has the wrong dimensions.
    #[error("feature plane {index} has shape {actual:?}, expected {expected:?}")]
    Shape {
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// Planes could not be stacked into one array.
    #[error("cannot stack feature planes: {0}")]
    Stack(String),
}

/// A prepared section window.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionInput {
    /// A single 2-D plane (band, index, or grayscale image).
    Plane(Array2<f32>),
    /// Several bands stacked along the first axis.
    Stack(Array3<f32>),
}

impl SectionInput {
    /// Rows and columns of the window.
    pub fn dims(&self) -> (usize, usize) {
        match self {
            SectionInput::Plane(plane) => plane.dim(),
            SectionInput::Stack(stack) => {
                let (_, rows, cols) = stack.dim();
                (rows, cols)
            }
        }
    }

    /// Number of stacked bands (1 for a plane).
    pub fn band_count(&self) -> usize {
        match self {
            SectionInput::Plane(_) => 1,
            SectionInput::Stack(stack) => stack.dim().0,
        }
    }
}

/// Parameters for one feature computation.
#[derive(Debug, Clone, Copy)]
pub struct FeatureRequest<'a> {
    pub trigger: Trigger,
    /// Output pixel size in input pixels.
    pub block: usize,
    /// Statistics window sizes in input pixels.
    pub scales: &'a [usize],
}

/// Output dimensions of a section: one pixel per (possibly partial) block.
pub fn out_dims(rows: usize, cols: usize, block: usize) -> (usize, usize) {
    let block = block.max(1);
    (rows.div_ceil(block), cols.div_ceil(block))
}

/// Computes per-scale statistic planes for a section.
pub trait FeatureComputer: Send + Sync {
    /// Returns the scale-major list of feature planes.
    fn compute(
        &self,
        input: &SectionInput,
        request: &FeatureRequest<'_>,
    ) -> Result<Vec<Array2<f32>>, FeatureError>;
}
