//! Reshaping the flat feature list into a band stack.

use ndarray::{stack, Array2, Array3, ArrayView2, Axis};

use super::FeatureError;

/// Stacks feature planes into a `(n_bands × out_rows × out_cols)` array.
///
/// Fails unless exactly `n_bands` planes are supplied and every plane is
/// `out_rows × out_cols`.
pub fn reshape_features(
    planes: Vec<Array2<f32>>,
    out_rows: usize,
    out_cols: usize,
    n_bands: usize,
) -> Result<Array3<f32>, FeatureError> {
    if planes.len() != n_bands {
        return Err(FeatureError::Count {
            expected: n_bands,
            actual: planes.len(),
        });
    }

    for (index, plane) in planes.iter().enumerate() {
        if plane.dim() != (out_rows, out_cols) {
            return Err(FeatureError::Shape {
                index,
                expected: (out_rows, out_cols),
                actual: plane.dim(),
            });
        }
    }

    if planes.is_empty() {
        return Ok(Array3::zeros((0, out_rows, out_cols)));
    }

    stack_planes(&planes)
}

fn stack_planes(planes: &[Array2<f32>]) -> Result<Array3<f32>, FeatureError> {
    let views: Vec<ArrayView2<'_, f32>> = planes.iter().map(|p| p.view()).collect();
    stack(Axis(0), &views).map_err(|e| FeatureError::Stack(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reshape_orders_planes_along_first_axis() {
        let planes = vec![
            Array2::from_elem((2, 3), 1.0f32),
            Array2::from_elem((2, 3), 2.0f32),
        ];
        let out = reshape_features(planes, 2, 3, 2).unwrap();
        assert_eq!(out.dim(), (2, 2, 3));
        assert_eq!(out[[0, 1, 2]], 1.0);
        assert_eq!(out[[1, 0, 0]], 2.0);
    }

    #[test]
    fn test_reshape_count_mismatch() {
        let planes = vec![Array2::zeros((2, 2))];
        assert_eq!(
            reshape_features(planes, 2, 2, 3),
            Err(FeatureError::Count {
                expected: 3,
                actual: 1
            })
        );
    }

    #[test]
    fn test_reshape_shape_mismatch() {
        let planes = vec![Array2::zeros((2, 2)), Array2::zeros((2, 3))];
        assert!(matches!(
            reshape_features(planes, 2, 2, 2),
            Err(FeatureError::Shape { index: 1, .. })
        ));
    }

    #[test]
    fn test_stack_failure_is_an_error() {
        let planes = vec![Array2::zeros((2, 2)), Array2::zeros((3, 2))];
        assert!(matches!(
            stack_planes(&planes),
            Err(FeatureError::Stack(_))
        ));
    }
}
