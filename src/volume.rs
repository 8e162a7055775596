use crate::affine::Affine;
use crate::coordinates::CoordinateFrame;
use crate::enums::Orientation;
use crate::error::{Error, Result};
use crate::normalizer::AxisNormalizer;
use crate::options::NormalizerOptions;

use ndarray::{ArrayD, ArrayViewD, Axis};

/// Spatial axis names for DICOM series and NIfTI volumes.
pub const RAS_LABELS: [Orientation; 3] = [
    Orientation::Axial,
    Orientation::Coronal,
    Orientation::Sagittal,
];

/// Spatial axis names for NRRD volumes.
pub const NRRD_LABELS: [Orientation; 3] = [
    Orientation::Sagittal,
    Orientation::Coronal,
    Orientation::Axial,
];

/// One label per axis of a grid of rank `rank`: the spatial names first,
/// then `Axis{i}` for every extra axis.
pub fn axis_labels(spatial: &[Orientation; 3], rank: usize) -> Vec<String> {
    (0..rank)
        .map(|i| match spatial.get(i) {
            Some(orientation) => orientation.label().to_string(),
            None => format!("Axis{i}"),
        })
        .collect()
}

/// The array and affine as they were before normalization, plus the
/// thresholds the normalization ran with.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginalGeometry<T> {
    pub grid: ArrayD<T>,
    pub affine: Affine,
    pub normalizer: NormalizerOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    grid: ArrayD<T>,
    affine: Affine,
    axis_labels: Vec<String>,
    label: String,
    original: Option<OriginalGeometry<T>>,
}

impl<T> Volume<T> {
    pub fn new(
        grid: ArrayD<T>,
        affine: Affine,
        axis_labels: Vec<String>,
        label: impl Into<String>,
    ) -> Result<Self> {
        if axis_labels.len() != grid.ndim() {
            return Err(Error::LabelCount {
                labels: axis_labels.len(),
                rank: grid.ndim(),
            });
        }
        Ok(Self {
            grid,
            affine,
            axis_labels,
            label: label.into(),
            original: None,
        })
    }

    pub fn with_original(mut self, original: OriginalGeometry<T>) -> Self {
        self.original = Some(original);
        self
    }

    pub fn grid(&self) -> &ArrayD<T> {
        &self.grid
    }

    pub fn grid_mut(&mut self) -> &mut ArrayD<T> {
        &mut self.grid
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn axis_labels(&self) -> &[String] {
        &self.axis_labels
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn original(&self) -> Option<&OriginalGeometry<T>> {
        self.original.as_ref()
    }

    pub fn shape(&self) -> &[usize] {
        self.grid.shape()
    }

    /// Extent of the first three axes; missing axes count as 1.
    pub fn dim(&self) -> (usize, usize, usize) {
        let shape = self.grid.shape();
        let extent = |i: usize| shape.get(i).copied().unwrap_or(1);
        (extent(0), extent(1), extent(2))
    }

    /// Voxel size along each spatial axis, from the affine's column norms.
    pub fn spacing(&self) -> [f64; 3] {
        [
            self.affine.column(0).norm(),
            self.affine.column(1).norm(),
            self.affine.column(2).norm(),
        ]
    }

    /// Pixel/world conversion for this volume. Grids with fewer than three
    /// axes get generic names for the missing ones.
    pub fn frame(&self) -> Result<CoordinateFrame> {
        let labels = (0..3)
            .map(|i| {
                self.axis_labels
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("Axis{i}"))
            })
            .collect();
        CoordinateFrame::new(self.affine, labels)
    }

    fn axis_of(&self, orientation: Orientation) -> Option<usize> {
        self.axis_labels
            .iter()
            .take(3)
            .position(|label| label == orientation.label())
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
    ) -> Option<ArrayViewD<'_, T>> {
        let axis = self.axis_of(orientation)?;
        if !self.is_valid_index(index, axis) {
            return None;
        }
        Some(self.grid.index_axis(Axis(axis), index))
    }

    fn is_valid_index(&self, index: usize, axis: usize) -> bool {
        self.grid.shape().get(axis).is_some_and(|&extent| index < extent)
    }
}

impl<T> Volume<T> {
    /// Reverse the normalization of `grid` with the retained geometry.
    fn restore<U: Clone>(&self, grid: ArrayD<U>) -> Result<(ArrayD<U>, Affine)> {
        match &self.original {
            Some(original) => {
                let normalizer = AxisNormalizer::new(original.normalizer);
                let grid = normalizer.reverse(grid, &original.affine)?;
                Ok((grid, original.affine))
            }
            None => Ok((grid, self.affine)),
        }
    }

    /// A 0/1 label grid from `mask` in on-disk orientation, for a writer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MaskShape`] when `mask` does not match the grid.
    pub fn export_mask(&self, mask: &ArrayD<bool>) -> Result<(ArrayD<u8>, Affine)> {
        if mask.shape() != self.grid.shape() {
            return Err(Error::MaskShape {
                expected: self.grid.shape().to_vec(),
                actual: mask.shape().to_vec(),
            });
        }
        self.restore(mask.mapv(u8::from))
    }
}

impl<T: Clone> Volume<T> {
    /// The grid and affine in their on-disk orientation, for a writer.
    ///
    /// Edits made to the normalized grid are carried over. Without retained
    /// geometry the normalized grid and affine are returned.
    pub fn export(&self) -> Result<(ArrayD<T>, Affine)> {
        self.restore(self.grid.clone())
    }
}
