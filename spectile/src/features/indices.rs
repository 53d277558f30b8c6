//! Spectral indices and image conversions applied before statistics.

use ndarray::{Array2, ArrayView2, ArrayView3, Axis, Zip};

const EPS: f32 = 1e-10;

/// Normalized difference vegetation index, `(nir - red) / (nir + red)`.
///
/// Non-finite inputs propagate as NaN.
pub fn ndvi(red: ArrayView2<'_, f32>, nir: ArrayView2<'_, f32>) -> Array2<f32> {
    Zip::from(&red).and(&nir).map_collect(|&r, &n| {
        if r.is_finite() && n.is_finite() {
            (n - r) / (n + r + EPS)
        } else {
            f32::NAN
        }
    })
}

/// Two-band enhanced vegetation index, `2.5 (nir - red) / (nir + 2.4 red + 1)`.
pub fn evi2(red: ArrayView2<'_, f32>, nir: ArrayView2<'_, f32>) -> Array2<f32> {
    Zip::from(&red).and(&nir).map_collect(|&r, &n| {
        let denom = n + 2.4 * r + 1.0;
        if r.is_finite() && n.is_finite() && denom.abs() > EPS {
            2.5 * (n - r) / denom
        } else {
            f32::NAN
        }
    })
}

/// BT.601 luma from the first three bands of a stack.
///
/// The caller guarantees at least three bands.
pub fn rgb_to_gray(stack: ArrayView3<'_, f32>) -> Array2<f32> {
    let r = stack.index_axis(Axis(0), 0);
    let g = stack.index_axis(Axis(0), 1);
    let b = stack.index_axis(Axis(0), 2);
    Zip::from(&r)
        .and(&g)
        .and(&b)
        .map_collect(|&r, &g, &b| 0.299 * r + 0.587 * g + 0.114 * b)
}

#[inline(always)]
fn reflect_index(mut i: isize, len: isize) -> usize {
    if len <= 1 {
        return 0;
    }
    while i < 0 || i >= len {
        if i < 0 {
            i = -i - 1;
        }
        if i >= len {
            i = 2 * len - i - 1;
        }
    }
    i as usize
}

/// Sobel gradient magnitude with reflected borders.
pub fn sobel_magnitude(img: ArrayView2<'_, f32>) -> Array2<f32> {
    let (h, w) = img.dim();
    let (hh, ww) = (h as isize, w as isize);

    Array2::from_shape_fn((h, w), |(r, c)| {
        let (rr, cc) = (r as isize, c as isize);
        let g = |dr: isize, dc: isize| -> f64 {
            img[[reflect_index(rr + dr, hh), reflect_index(cc + dc, ww)]] as f64
        };

        // Classic 3x3 Sobel kernels
        let gx = -g(-1, -1) + g(-1, 1) - 2.0 * g(0, -1) + 2.0 * g(0, 1) - g(1, -1) + g(1, 1);
        let gy = -g(-1, -1) - 2.0 * g(-1, 0) - g(-1, 1) + g(1, -1) + 2.0 * g(1, 0) + g(1, 1);

        (gx * gx + gy * gy).sqrt() as f32
    })
}

/// 3x3 binomial blur with reflected borders.
fn blur3(img: ArrayView2<'_, f32>) -> Array2<f32> {
    const WEIGHTS: [f64; 3] = [1.0, 2.0, 1.0];
    let (h, w) = img.dim();
    let (hh, ww) = (h as isize, w as isize);

    Array2::from_shape_fn((h, w), |(r, c)| {
        let mut acc = 0.0f64;
        for (i, wr) in WEIGHTS.iter().enumerate() {
            for (j, wc) in WEIGHTS.iter().enumerate() {
                let rr = reflect_index(r as isize + i as isize - 1, hh);
                let cc = reflect_index(c as isize + j as isize - 1, ww);
                acc += wr * wc * img[[rr, cc]] as f64;
            }
        }
        (acc / 16.0) as f32
    })
}

/// Frequency-tuned saliency over the first three bands of a stack.
///
/// Every pixel scores the Euclidean distance between its blurred colour and
/// the mean colour of the whole window. Non-finite samples are left out of
/// the mean and propagate as NaN through the blur.
///
/// The caller guarantees at least three bands.
pub fn saliency(stack: ArrayView3<'_, f32>) -> Array2<f32> {
    let (_, h, w) = stack.dim();
    let mut dist = Array2::<f32>::zeros((h, w));

    for band in stack.axis_iter(Axis(0)).take(3) {
        let (sum, count) = band
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0f64, 0usize), |(s, n), &v| (s + v as f64, n + 1));
        let mean = if count == 0 { 0.0 } else { (sum / count as f64) as f32 };

        Zip::from(&mut dist)
            .and(&blur3(band))
            .for_each(|d, &b| *d += (b - mean) * (b - mean));
    }

    dist.mapv_inplace(f32::sqrt);
    dist
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_ndvi_values() {
        let red = array![[0.1f32, 0.5], [0.0, f32::NAN]];
        let nir = array![[0.5f32, 0.5], [0.0, 0.3]];
        let out = ndvi(red.view(), nir.view());

        assert!((out[[0, 0]] - 0.6667).abs() < 1e-3);
        assert!(out[[0, 1]].abs() < 1e-6);
        assert_eq!(out[[1, 0]], 0.0);
        assert!(out[[1, 1]].is_nan());
    }

    #[test]
    fn test_evi2_values() {
        let red = array![[0.1f32]];
        let nir = array![[0.5f32]];
        let out = evi2(red.view(), nir.view());
        // 2.5 * 0.4 / (0.5 + 0.24 + 1.0)
        assert!((out[[0, 0]] - 0.5747).abs() < 1e-3);
    }

    #[test]
    fn test_rgb_to_gray_weights_sum_to_one() {
        let stack = Array3::from_elem((3, 2, 2), 100.0f32);
        let gray = rgb_to_gray(stack.view());
        assert!(gray.iter().all(|&v| (v - 100.0).abs() < 1e-3));
    }

    #[test]
    fn test_sobel_flat_image_is_zero() {
        let img = Array2::from_elem((5, 5), 3.0f32);
        let mag = sobel_magnitude(img.view());
        assert!(mag.iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn test_sobel_vertical_edge() {
        let img = Array2::from_shape_fn((5, 6), |(_, c)| if c < 3 { 0.0f32 } else { 1.0 });
        let mag = sobel_magnitude(img.view());
        assert!(mag[[2, 2]] > 3.9);
        assert!(mag[[2, 0]].abs() < 1e-6);
    }

    #[test]
    fn test_saliency_flat_image_is_zero() {
        let stack = Array3::from_elem((3, 4, 4), 7.0f32);
        let sal = saliency(stack.view());
        assert!(sal.iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn test_saliency_highlights_odd_patch() {
        let stack = Array3::from_shape_fn((3, 9, 9), |(b, r, c)| {
            if (3..6).contains(&r) && (3..6).contains(&c) && b == 0 {
                10.0f32
            } else {
                0.0
            }
        });
        let sal = saliency(stack.view());
        assert!(sal[[4, 4]] > sal[[0, 0]]);
        assert!(sal[[4, 4]] > 5.0);
    }

    #[test]
    fn test_blur_keeps_constant() {
        let img = Array2::from_elem((3, 5), 2.0f32);
        assert!(blur3(img.view()).iter().all(|&v| (v - 2.0).abs() < 1e-6));
    }

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect_index(-1, 5), 0);
        assert_eq!(reflect_index(5, 5), 4);
        assert_eq!(reflect_index(2, 5), 2);
        assert_eq!(reflect_index(3, 1), 0);
    }
}
