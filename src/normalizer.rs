//! Reorders and reflects volumes into the canonical internal orientation.
//!
//! [`AxisNormalizer::forward`] permutes and flips both the array and its
//! affine; [`AxisNormalizer::reverse`] undoes the array side exactly, given
//! the same reference affine. Both derive their decisions from a
//! [`NormalizationPlan`], so the two directions cannot disagree.

use crate::affine::Affine;
use crate::error::{Error, Result};
use crate::options::NormalizerOptions;
use crate::outcome::Outcome;
use nalgebra::Matrix4;
use ndarray::{ArrayD, Axis};

const SPATIAL_AXES: usize = 3;

/// Every array-side decision `forward` makes for one reference affine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizationPlan {
    /// New axis `k` is taken from old axis `permutation[k]`.
    pub permutation: [usize; 3],
    /// Axes reversed after the transpose.
    pub flips: [bool; 3],
    /// The normalized affine.
    pub affine: Affine,
}

impl NormalizationPlan {
    pub fn derive(reference: &Affine, options: &NormalizerOptions) -> Result<Outcome<Self>> {
        let determinant = reference.determinant();
        if !determinant.is_finite() || determinant.abs() <= options.singular_epsilon {
            return Err(Error::DegenerateAffine(format!(
                "linear block is singular (determinant {determinant})"
            )));
        }

        let swapped = reference.left_mul(&basis_swap());
        let mut outcome = Outcome::new(());
        let m = swapped.matrix();

        let mut dominant = [0usize; 3];
        for (column, slot) in dominant.iter_mut().enumerate() {
            let loadings = [
                m[(0, column)].abs(),
                m[(1, column)].abs(),
                m[(2, column)].abs(),
            ];
            let mut best = 0;
            for row in 1..SPATIAL_AXES {
                if loadings[row] > loadings[best] {
                    best = row;
                }
            }
            let runner_up = (0..SPATIAL_AXES)
                .filter(|&row| row != best)
                .map(|row| loadings[row])
                .fold(0.0, f64::max);
            if loadings[best] - runner_up <= options.tie_tolerance * loadings[best] {
                outcome.warn(Error::DegenerateAffine(format!(
                    "column {column} has near-equal loadings {loadings:?}; permutation may be unstable"
                )));
            }
            *slot = best;
        }

        let mut permutation = [usize::MAX; 3];
        for (column, &row) in dominant.iter().enumerate() {
            if permutation[row] != usize::MAX {
                return Err(Error::DegenerateAffine(format!(
                    "columns {} and {column} are both dominated by world axis {row}",
                    permutation[row]
                )));
            }
            permutation[row] = column;
        }

        let reordered = swapped
            .right_mul(&permutation_matrix(permutation))
            .right_mul(&reflection());
        let r = reordered.matrix();
        let flips = [r[(0, 0)] < 0.0, r[(1, 1)] < 0.0, r[(2, 2)] < 0.0];
        let affine = reordered.right_mul(&flip_matrix(flips));

        tracing::debug!(?permutation, ?flips, "derived normalization plan");
        Ok(outcome.map(|_| Self {
            permutation,
            flips,
            affine,
        }))
    }

    fn axis_order(&self, ndim: usize) -> Vec<usize> {
        self.permutation
            .iter()
            .copied()
            .chain(SPATIAL_AXES..ndim)
            .collect()
    }

    fn inverse_axis_order(&self, ndim: usize) -> Vec<usize> {
        let mut inverse = [0usize; 3];
        for (new, &old) in self.permutation.iter().enumerate() {
            inverse[old] = new;
        }
        inverse.into_iter().chain(SPATIAL_AXES..ndim).collect()
    }
}

/// Exchanges the roles of axis 0 and axis 2.
fn basis_swap() -> Matrix4<f64> {
    Matrix4::new(
        0.0, 0.0, 1.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        1.0, 0.0, 0.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Column `k` of `A * T` is column `permutation[k]` of `A`.
fn permutation_matrix(permutation: [usize; 3]) -> Matrix4<f64> {
    let mut matrix = Matrix4::zeros();
    for (new, &old) in permutation.iter().enumerate() {
        matrix[(old, new)] = 1.0;
    }
    matrix[(3, 3)] = 1.0;
    matrix
}

/// Negates the third world axis for display handedness.
fn reflection() -> Matrix4<f64> {
    Matrix4::from_diagonal(&nalgebra::Vector4::new(1.0, 1.0, -1.0, 1.0))
}

fn flip_matrix(flips: [bool; 3]) -> Matrix4<f64> {
    let sign = |flip: bool| if flip { -1.0 } else { 1.0 };
    Matrix4::from_diagonal(&nalgebra::Vector4::new(
        sign(flips[0]),
        sign(flips[1]),
        sign(flips[2]),
        1.0,
    ))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AxisNormalizer {
    options: NormalizerOptions,
}

impl AxisNormalizer {
    pub fn new(options: NormalizerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &NormalizerOptions {
        &self.options
    }

    pub fn plan(&self, reference: &Affine) -> Result<Outcome<NormalizationPlan>> {
        NormalizationPlan::derive(reference, &self.options)
    }

    /// Transpose and flip `array` into canonical order and return it with the
    /// normalized affine. Axes past the third are carried through untouched.
    pub fn forward<T>(&self, array: ArrayD<T>, affine: &Affine) -> Result<Outcome<(ArrayD<T>, Affine)>>
    where
        T: Clone,
    {
        check_rank(array.ndim())?;
        let outcome = self.plan(affine)?;
        let plan = outcome.value;

        let ndim = array.ndim();
        let mut normalized = array.permuted_axes(plan.axis_order(ndim));
        for (axis, flip) in plan.flips.iter().enumerate() {
            if *flip {
                normalized.invert_axis(Axis(axis));
            }
        }
        let normalized = normalized.as_standard_layout().into_owned();

        Ok(Outcome::with_warnings(
            (normalized, plan.affine),
            outcome.warnings,
        ))
    }

    /// Undo the array side of [`forward`](Self::forward) for the affine
    /// `reference` that `forward` was originally called with.
    pub fn reverse<T>(&self, array: ArrayD<T>, reference: &Affine) -> Result<ArrayD<T>>
    where
        T: Clone,
    {
        check_rank(array.ndim())?;
        let plan = self.plan(reference)?.value;

        let ndim = array.ndim();
        let mut restored = array;
        for (axis, flip) in plan.flips.iter().enumerate() {
            if *flip {
                restored.invert_axis(Axis(axis));
            }
        }
        let restored = restored.permuted_axes(plan.inverse_axis_order(ndim));
        Ok(restored.as_standard_layout().into_owned())
    }
}

fn check_rank(ndim: usize) -> Result<()> {
    if ndim < SPATIAL_AXES {
        return Err(Error::InvalidRank {
            expected: SPATIAL_AXES,
            actual: ndim,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, Array3, Array4, IxDyn};

    fn axial_affine() -> Affine {
        // DICOM-style axial stack: columns (c, r, slice step).
        Affine::from_columns(
            [[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 2.5]],
            [-10.0, 4.0, 7.0],
        )
    }

    #[test]
    fn axial_stack_moves_slices_first() {
        let normalizer = AxisNormalizer::default();
        let array = Array3::from_shape_fn((16, 12, 7), |(i, j, k)| (i * 1000 + j * 10 + k) as u32)
            .into_dyn();
        let outcome = normalizer.forward(array.clone(), &axial_affine()).unwrap();
        assert!(!outcome.has_warnings());
        let (normalized, affine) = outcome.value;

        assert_eq!(normalized.shape(), &[7, 16, 12]);
        let m = affine.matrix();
        for k in 0..3 {
            assert!(m[(k, k)] > 0.0);
        }
        // Axis 2 (old axis 1) is reversed by the handedness reflection.
        assert_eq!(
            normalized[IxDyn(&[3, 5, 0])],
            array[IxDyn(&[5, 11, 3])]
        );
    }

    #[test]
    fn reverse_restores_original() {
        let normalizer = AxisNormalizer::default();
        let affine = Affine::from_columns(
            [[0.0, -0.9, 0.1], [0.2, 0.0, 1.1], [-3.0, 0.3, 0.0]],
            [1.0, 2.0, 3.0],
        );
        let array = Array::from_shape_fn((3, 4, 5), |(i, j, k)| (i * 20 + j * 5 + k) as i16).into_dyn();
        let (normalized, _) = normalizer.forward(array.clone(), &affine).unwrap().value;
        let restored = normalizer.reverse(normalized, &affine).unwrap();
        assert_eq!(restored, array);
    }

    #[test]
    fn extra_axes_pass_through() {
        let normalizer = AxisNormalizer::default();
        let array = Array4::from_shape_fn((2, 3, 4, 5), |(i, j, k, t)| (i + 2 * j + 6 * k + 24 * t) as u16)
            .into_dyn();
        let (normalized, _) = normalizer.forward(array.clone(), &axial_affine()).unwrap().value;
        assert_eq!(normalized.shape()[3], 5);
        assert_eq!(normalizer.reverse(normalized, &axial_affine()).unwrap(), array);
    }

    #[test]
    fn singular_affine_is_degenerate() {
        let affine = Affine::from_columns(
            [[1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
            [0.0; 3],
        );
        let array = Array3::<u8>::zeros((2, 2, 2)).into_dyn();
        assert!(matches!(
            AxisNormalizer::default().forward(array, &affine),
            Err(Error::DegenerateAffine(_))
        ));
    }

    #[test]
    fn shared_dominant_axis_is_degenerate() {
        // Invertible, but columns 0 and 1 both load most on the same world axis.
        let affine = Affine::from_columns(
            [[1.0, 0.2, 0.0], [1.0, -0.2, 0.0], [0.0, 0.0, 1.0]],
            [0.0; 3],
        );
        assert!(matches!(
            AxisNormalizer::default().plan(&affine),
            Err(Error::DegenerateAffine(_))
        ));
    }

    #[test]
    fn near_tie_is_reported_as_warning() {
        let affine = Affine::from_columns(
            [[0.7071, 0.0, 0.70705], [0.0, 1.0, 0.0], [-0.70705, 0.0, 0.7071]],
            [0.0; 3],
        );
        let outcome = AxisNormalizer::default().plan(&affine).unwrap();
        assert!(outcome.has_warnings());
    }

    #[test]
    fn two_dimensional_input_is_rejected() {
        let array = ndarray::Array2::<u8>::zeros((2, 2)).into_dyn();
        assert!(matches!(
            AxisNormalizer::default().forward(array, &Affine::identity()),
            Err(Error::InvalidRank { expected: 3, actual: 2 })
        ));
    }
}
