use crate::affine::Affine;
use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2};

/// Pixel/world conversion over a normalized affine.
///
/// Derived entirely from the affine and labels; rebuild it rather than
/// mutating it when the affine changes.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateFrame {
    affine: Affine,
    inverse: Affine,
    axis_labels: Vec<String>,
}

impl CoordinateFrame {
    pub fn new(affine: Affine, axis_labels: Vec<String>) -> Result<Self> {
        if axis_labels.len() != 3 {
            return Err(Error::LabelCount {
                labels: axis_labels.len(),
                rank: 3,
            });
        }
        let inverse = affine
            .inverse()
            .ok_or_else(|| Error::DegenerateAffine("affine is not invertible".into()))?;
        Ok(Self {
            affine,
            inverse,
            axis_labels,
        })
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn inverse(&self) -> &Affine {
        &self.inverse
    }

    pub fn axis_label(&self, axis: usize) -> Option<&str> {
        self.axis_labels.get(axis).map(String::as_str)
    }

    pub fn axis_labels(&self) -> &[String] {
        &self.axis_labels
    }

    pub fn pixel_to_world(&self, indices: [f64; 3]) -> [f64; 3] {
        self.affine.transform_point(indices)
    }

    pub fn world_to_pixel(&self, coords: [f64; 3]) -> [f64; 3] {
        self.inverse.transform_point(coords)
    }

    /// Convert an `(n, 3)` array of index vectors, one per row.
    pub fn pixel_to_world_batch(&self, indices: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        transform_rows(&self.affine, indices)
    }

    pub fn world_to_pixel_batch(&self, coords: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        transform_rows(&self.inverse, coords)
    }
}

fn transform_rows(affine: &Affine, points: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
    if points.ncols() != 3 {
        return Err(Error::InvalidRank {
            expected: 3,
            actual: points.ncols(),
        });
    }
    let mut out = Array2::zeros((points.nrows(), 3));
    for (src, mut dst) in points.outer_iter().zip(out.outer_iter_mut()) {
        let world = affine.transform_point([src[0], src[1], src[2]]);
        for (slot, value) in dst.iter_mut().zip(world) {
            *slot = value;
        }
    }
    Ok(out)
}
