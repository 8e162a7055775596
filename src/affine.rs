//! Voxel-to-world affines and their construction from format geometry.
//!
//! Every affine maps a column vector `[i, j, k, 1]` of voxel indices to a
//! homogeneous world point in millimetres. The builders here produce the
//! affine in the source format's native axis order; the [`AxisNormalizer`]
//! takes it from there.
//!
//! [`AxisNormalizer`]: crate::normalizer::AxisNormalizer

use crate::error::{Error, Result};
use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};
use ndarray::{ArrayD, Axis};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine(Matrix4<f64>);

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine {
    pub fn identity() -> Self {
        Self(Matrix4::identity())
    }

    /// Wrap a matrix whose last row is `[0, 0, 0, 1]`.
    pub fn from_matrix(matrix: Matrix4<f64>) -> Result<Self> {
        let last = matrix.row(3);
        if last[0] != 0.0 || last[1] != 0.0 || last[2] != 0.0 || last[3] != 1.0 {
            return Err(Error::DegenerateAffine(format!(
                "last row must be [0, 0, 0, 1], got {:?}",
                [last[0], last[1], last[2], last[3]]
            )));
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(Error::DegenerateAffine("non-finite entry".into()));
        }
        Ok(Self(matrix))
    }

    pub fn from_rows(rows: [[f64; 4]; 4]) -> Result<Self> {
        Self::from_matrix(Matrix4::from_fn(|r, c| rows[r][c]))
    }

    /// Build from the 3x3 linear block (columns are voxel axes) and a translation.
    pub fn from_columns(columns: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        let mut matrix = Matrix4::identity();
        for (c, column) in columns.iter().enumerate() {
            for r in 0..3 {
                matrix[(r, c)] = column[r];
            }
        }
        for r in 0..3 {
            matrix[(r, 3)] = translation[r];
        }
        Self(matrix)
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.0
    }

    pub fn to_rows(&self) -> [[f64; 4]; 4] {
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = self.0[(r, c)];
            }
        }
        rows
    }

    pub fn linear(&self) -> Matrix3<f64> {
        Matrix3::from_fn(|r, c| self.0[(r, c)])
    }

    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.0[(0, 3)], self.0[(1, 3)], self.0[(2, 3)])
    }

    pub fn column(&self, index: usize) -> Vector3<f64> {
        Vector3::new(self.0[(0, index)], self.0[(1, index)], self.0[(2, index)])
    }

    pub fn determinant(&self) -> f64 {
        self.linear().determinant()
    }

    /// Inverse affine, or `None` when the linear block is singular.
    pub fn inverse(&self) -> Option<Self> {
        self.0.try_inverse().map(Self)
    }

    pub fn transform_point(&self, point: [f64; 3]) -> [f64; 3] {
        let p = self.0 * Vector4::new(point[0], point[1], point[2], 1.0);
        [p[0], p[1], p[2]]
    }

    pub(crate) fn left_mul(&self, lhs: &Matrix4<f64>) -> Self {
        Self(lhs * self.0)
    }

    pub(crate) fn right_mul(&self, rhs: &Matrix4<f64>) -> Self {
        Self(self.0 * rhs)
    }
}

/// Geometry of an evenly spaced DICOM slice stack.
///
/// Assumes slices are equidistant and ordered monotonically between `first`
/// and `last`; neither is verified.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DicomGeometry {
    pub first_position: [f64; 3],
    pub last_position: [f64; 3],
    pub row_cosine: [f64; 3],
    pub column_cosine: [f64; 3],
    /// (row spacing, column spacing)
    pub pixel_spacing: [f64; 2],
    pub slice_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NiftiGeometry {
    pub affine: Option<[[f64; 4]; 4]>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NrrdGeometry {
    /// One direction vector per spatial axis.
    pub space_directions: Option<[[f64; 3]; 3]>,
    pub space_origin: Option<[f64; 3]>,
    /// e.g. `left-posterior-superior` or `RAS`.
    pub space: Option<String>,
}

/// Geometry fields of a single-shot volume, tagged by format.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryFields {
    Nifti(NiftiGeometry),
    Nrrd(NrrdGeometry),
}

/// DICOM patient coordinates run left, posterior, superior.
const LPS_SIGNS: [bool; 3] = [true, true, false];

/// Negate whole world rows, translation included.
fn negate_rows(matrix: &mut Matrix4<f64>, signs: [bool; 3]) {
    for (row, negative) in signs.iter().enumerate() {
        if *negative {
            for c in 0..4 {
                matrix[(row, c)] = -matrix[(row, c)];
            }
        }
    }
}

pub struct AffineBuilder;

impl AffineBuilder {
    /// Affine of a DICOM slice stack, in RAS world coordinates.
    ///
    /// The voxel columns come straight from the slice geometry, which is
    /// LPS; the x and y world rows are then negated so that DICOM volumes
    /// share the frame of NRRD volumes whose `space` is anatomical.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DegenerateAffine`] for fewer than two slices or
    /// non-finite geometry.
    pub fn dicom(geometry: &DicomGeometry) -> Result<Affine> {
        let n = geometry.slice_count;
        if n < 2 {
            return Err(Error::DegenerateAffine(format!(
                "slice axis needs at least two slices, got {n}"
            )));
        }
        let [sr, sc] = geometry.pixel_spacing;
        let p0 = Vector3::from(geometry.first_position);
        let pn = Vector3::from(geometry.last_position);
        let r = Vector3::from(geometry.row_cosine);
        let c = Vector3::from(geometry.column_cosine);
        let step = (p0 - pn) / (1.0 - n as f64);

        let column0 = c * sc;
        let column1 = r * sr;
        let mut matrix = *Affine::from_columns(
            [column0.into(), column1.into(), step.into()],
            geometry.first_position,
        )
        .matrix();
        negate_rows(&mut matrix, LPS_SIGNS);
        Affine::from_matrix(matrix)
    }

    /// Take the header affine verbatim, then make its first three diagonal
    /// entries non-negative by reversing the array along each offending axis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SeriesDecode`] when the header has no affine or its
    /// last row is not `[0, 0, 0, 1]`.
    pub fn nifti<T>(
        series_id: &str,
        geometry: &NiftiGeometry,
        grid: ArrayD<T>,
    ) -> Result<(ArrayD<T>, Affine)>
    where
        T: Clone,
    {
        let rows = geometry
            .affine
            .ok_or_else(|| Error::series_decode(series_id, "missing NIfTI affine"))?;
        let affine = Affine::from_rows(rows)
            .map_err(|e| Error::series_decode(series_id, e.to_string()))?;
        Ok(Self::correct_negative_diagonal(grid, affine))
    }

    /// Column `k` with a negative diagonal entry is negated and `shape[k]`
    /// times the original column is added to the translation, so that index
    /// `shape[k]` of the reversed axis lands where index 0 used to.
    pub fn correct_negative_diagonal<T>(mut grid: ArrayD<T>, affine: Affine) -> (ArrayD<T>, Affine)
    where
        T: Clone,
    {
        let mut matrix = *affine.matrix();
        let spatial = grid.ndim().min(3);
        for k in 0..spatial {
            if matrix[(k, k)] < 0.0 {
                let extent = grid.shape()[k] as f64;
                for r in 0..3 {
                    let original = matrix[(r, k)];
                    matrix[(r, k)] = -original;
                    matrix[(r, 3)] += extent * original;
                }
                grid.invert_axis(Axis(k));
            }
        }
        (grid.as_standard_layout().into_owned(), Affine(matrix))
    }

    /// Affine from NRRD space directions and origin. Rows whose `space`
    /// token points left, posterior or inferior are negated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SeriesDecode`] when directions or origin are missing
    /// and [`Error::UnknownOrientation`] for an unrecognised `space` token.
    pub fn nrrd(series_id: &str, geometry: &NrrdGeometry) -> Result<Affine> {
        let directions = geometry
            .space_directions
            .ok_or_else(|| Error::series_decode(series_id, "missing NRRD space directions"))?;
        let origin = geometry
            .space_origin
            .ok_or_else(|| Error::series_decode(series_id, "missing NRRD space origin"))?;
        let mut matrix = *Affine::from_columns(directions, origin).matrix();

        if let Some(space) = geometry.space.as_deref() {
            negate_rows(&mut matrix, space_signs(space)?);
        }
        Affine::from_matrix(matrix).map_err(|e| Error::series_decode(series_id, e.to_string()))
    }

    pub fn build<T>(
        series_id: &str,
        fields: &GeometryFields,
        grid: ArrayD<T>,
    ) -> Result<(ArrayD<T>, Affine)>
    where
        T: Clone,
    {
        match fields {
            GeometryFields::Nifti(geometry) => Self::nifti(series_id, geometry, grid),
            GeometryFields::Nrrd(geometry) => Ok((grid, Self::nrrd(series_id, geometry)?)),
        }
    }
}

/// Which world axes of an NRRD `space` run towards the negative direction.
///
/// Accepts the long form (`left-posterior-superior`) and the three letter
/// abbreviation (`LPS`). Coordinate systems without anatomical meaning
/// (`scanner-xyz`, `3D-right-handed`, ...) yield no flips.
fn space_signs(space: &str) -> Result<[bool; 3]> {
    let space = space.trim().to_ascii_lowercase();
    if matches!(
        space.as_str(),
        "scanner-xyz" | "3d-right-handed" | "3d-left-handed" | ""
    ) {
        return Ok([false; 3]);
    }

    let tokens: Vec<String> = if space.contains('-') {
        space.split('-').map(str::to_string).collect()
    } else {
        space.chars().map(|c| c.to_string()).collect()
    };
    // 4D spaces such as `right-anterior-superior-time` carry a trailing axis.
    if tokens.len() < 3 {
        return Err(Error::UnknownOrientation(space));
    }

    let mut signs = [false; 3];
    for (axis, token) in tokens.iter().take(3).enumerate() {
        signs[axis] = match token.as_str() {
            "left" | "l" | "posterior" | "p" | "inferior" | "i" => true,
            "right" | "r" | "anterior" | "a" | "superior" | "s" => false,
            other => return Err(Error::UnknownOrientation(other.to_string())),
        };
    }
    Ok(signs)
}
