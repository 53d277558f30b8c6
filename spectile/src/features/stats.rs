//! Block-wise multi-scale statistics.

use ndarray::{s, Array2, ArrayView2, Axis};

use super::{out_dims, FeatureComputer, FeatureError, FeatureRequest, SectionInput};
use crate::config::Trigger;

/// Moments of the finite samples in one window.
#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    count: usize,
    mean: f64,
    variance: f64,
    min: f32,
    max: f32,
}

/// Two-pass mean/variance in f64 over the finite values of a window.
fn window_moments(plane: ArrayView2<'_, f32>) -> Moments {
    let mut count = 0usize;
    let mut sum = 0.0f64;
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;

    for &v in plane.iter().filter(|v| v.is_finite()) {
        count += 1;
        sum += v as f64;
        min = min.min(v);
        max = max.max(v);
    }

    if count == 0 {
        return Moments::default();
    }

    let mean = sum / count as f64;
    let variance = plane
        .iter()
        .filter(|v| v.is_finite())
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / count as f64;

    Moments {
        count,
        mean,
        variance,
        min,
        max,
    }
}

/// Half-open range of a window of side `scale` centred on `center`, shifted
/// inward at the edges and clamped to `0..len`.
fn centred_range(center: usize, scale: usize, len: usize) -> (usize, usize) {
    let start = center.saturating_sub(scale / 2);
    let end = (start + scale).min(len);
    (end.saturating_sub(scale), end)
}

/// Reference [`FeatureComputer`]: for every output block and every scale, a
/// square window of side `scale` centred on the block yields:
///
/// | trigger        | features per scale                  |
/// |----------------|-------------------------------------|
/// | `mean`         | mean, variance                      |
/// | `ndvi`, `evi2` | mean of the index                   |
/// | `grad`         | mean, standard deviation            |
/// | `saliency`     | mean, standard deviation            |
/// | `dmp`          | max − min for every stacked band    |
///
/// Non-finite samples are ignored; a window without finite samples yields 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockStatsComputer;

impl BlockStatsComputer {
    pub fn new() -> Self {
        Self
    }

    /// Applies `stat` to the window around every output block of `plane`.
    fn per_block(
        plane: ArrayView2<'_, f32>,
        block: usize,
        scale: usize,
        stat: impl Fn(&Moments) -> f32,
    ) -> Array2<f32> {
        let (rows, cols) = plane.dim();
        let block = block.max(1);
        let (out_rows, out_cols) = out_dims(rows, cols, block);

        Array2::from_shape_fn((out_rows, out_cols), |(orow, ocol)| {
            let center_r = (orow * block + block / 2).min(rows - 1);
            let center_c = (ocol * block + block / 2).min(cols - 1);
            let (r0, r1) = centred_range(center_r, scale, rows);
            let (c0, c1) = centred_range(center_c, scale, cols);

            let moments = window_moments(plane.slice(s![r0..r1, c0..c1]));
            if moments.count == 0 {
                0.0
            } else {
                stat(&moments)
            }
        })
    }
}

impl FeatureComputer for BlockStatsComputer {
    fn compute(
        &self,
        input: &SectionInput,
        request: &FeatureRequest<'_>,
    ) -> Result<Vec<Array2<f32>>, FeatureError> {
        let trigger = request.trigger;
        let block = request.block;

        let (rows, cols) = input.dims();
        if rows == 0 || cols == 0 {
            return Err(FeatureError::UnsupportedInput {
                trigger,
                reason: "empty section".to_string(),
            });
        }

        let mut planes = Vec::new();

        match (trigger, input) {
            (Trigger::Dmp, SectionInput::Stack(stack)) => {
                for &scale in request.scales {
                    for band in stack.axis_iter(Axis(0)) {
                        planes.push(Self::per_block(band, block, scale, |m| m.max - m.min));
                    }
                }
            }
            (Trigger::Dmp, SectionInput::Plane(_)) => {
                return Err(FeatureError::UnsupportedInput {
                    trigger,
                    reason: "expected stacked bands".to_string(),
                });
            }
            (_, SectionInput::Stack(_)) => {
                return Err(FeatureError::UnsupportedInput {
                    trigger,
                    reason: "expected a single plane".to_string(),
                });
            }
            (Trigger::Mean, SectionInput::Plane(plane)) => {
                for &scale in request.scales {
                    planes.push(Self::per_block(plane.view(), block, scale, |m| {
                        m.mean as f32
                    }));
                    planes.push(Self::per_block(plane.view(), block, scale, |m| {
                        m.variance as f32
                    }));
                }
            }
            (Trigger::Ndvi | Trigger::Evi2, SectionInput::Plane(plane)) => {
                for &scale in request.scales {
                    planes.push(Self::per_block(plane.view(), block, scale, |m| {
                        m.mean as f32
                    }));
                }
            }
            (Trigger::Grad | Trigger::Saliency, SectionInput::Plane(plane)) => {
                for &scale in request.scales {
                    planes.push(Self::per_block(plane.view(), block, scale, |m| {
                        m.mean as f32
                    }));
                    planes.push(Self::per_block(plane.view(), block, scale, |m| {
                        m.variance.sqrt() as f32
                    }));
                }
            }
        }

        Ok(planes)
    }
}
