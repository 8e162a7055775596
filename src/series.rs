//! Grouping, ordering and stacking of decoded slices into volumes.

use crate::affine::{Affine, AffineBuilder, DicomGeometry};
use crate::enums::SortBy;
use crate::error::{Error, Result};
use crate::normalizer::AxisNormalizer;
use crate::options::AssemblyOptions;
use crate::outcome::Outcome;
use crate::volume::{OriginalGeometry, RAS_LABELS, Volume, axis_labels};

use nalgebra::Vector3;
use ndarray::{Array2, ArrayView2, Axis, stack};
use rayon::prelude::*;
use std::collections::HashMap;

pub const UNKNOWN_SERIES: &str = "Unknown Series";

/// One decoded 2D image and the geometry tags that came with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice<T> {
    pub grid: Array2<T>,
    pub position: Option<[f64; 3]>,
    /// (row cosine, column cosine)
    pub orientation: Option<([f64; 3], [f64; 3])>,
    /// (row spacing, column spacing)
    pub pixel_spacing: Option<[f64; 2]>,
    pub instance_index: i64,
    pub series_id: String,
    /// Descriptive labels in priority order; `None` marks an absent tag.
    pub label_candidates: Vec<Option<String>>,
}

impl<T> Slice<T> {
    pub fn new(series_id: impl Into<String>, instance_index: i64, grid: Array2<T>) -> Self {
        Self {
            grid,
            position: None,
            orientation: None,
            pixel_spacing: None,
            instance_index,
            series_id: series_id.into(),
            label_candidates: Vec::new(),
        }
    }

    pub fn with_position(mut self, position: [f64; 3]) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_orientation(mut self, row: [f64; 3], column: [f64; 3]) -> Self {
        self.orientation = Some((row, column));
        self
    }

    pub fn with_pixel_spacing(mut self, spacing: [f64; 2]) -> Self {
        self.pixel_spacing = Some(spacing);
        self
    }

    pub fn with_label_candidates(mut self, candidates: Vec<Option<String>>) -> Self {
        self.label_candidates = candidates;
        self
    }

    pub fn shape(&self) -> (usize, usize) {
        self.grid.dim()
    }

    fn has_geometry(&self) -> bool {
        self.position.is_some() && self.orientation.is_some() && self.pixel_spacing.is_some()
    }

    fn normal(&self) -> Option<Vector3<f64>> {
        let (row, column) = self.orientation?;
        Some(Vector3::from(row).cross(&Vector3::from(column)))
    }
}

/// Slices sharing one series identifier, in discovery order until sorted.
#[derive(Debug, Clone, PartialEq)]
pub struct Series<T> {
    pub id: String,
    pub slices: Vec<Slice<T>>,
}

impl<T> Series<T> {
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

/// First present, non-empty candidate, or `default`.
pub fn resolve_label<'a, I>(candidates: I, default: &str) -> String
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|label| !label.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Partition slices by series identifier. Groups come back in the order
/// their first slice was seen; slices keep discovery order within a group.
pub fn group<T>(slices: Vec<Slice<T>>) -> Result<Vec<Series<T>>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Series<T>> = Vec::new();
    for slice in slices {
        let position = *index.entry(slice.series_id.clone()).or_insert_with(|| {
            groups.push(Series {
                id: slice.series_id.clone(),
                slices: Vec::new(),
            });
            groups.len() - 1
        });
        groups[position].slices.push(slice);
    }
    if groups.is_empty() {
        return Err(Error::NotFound("slice input".into()));
    }
    Ok(groups)
}

/// Stable in-place ordering; ties keep their relative discovery order.
pub fn sort_slices<T>(slices: &mut [Slice<T>], sort_by: SortBy) {
    match sort_by {
        SortBy::InstanceNumber => slices.sort_by_key(|slice| slice.instance_index),
        SortBy::ImagePositionPatient => {
            let Some(normal) = slices.iter().find_map(Slice::normal) else {
                return;
            };
            slices.sort_by(|a, b| {
                let distance = |slice: &Slice<T>| {
                    slice
                        .position
                        .map(|p| Vector3::from(p).dot(&normal))
                        .unwrap_or(0.0)
                };
                distance(a)
                    .partial_cmp(&distance(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        SortBy::None => {}
    }
}

pub struct SeriesAssembler {
    options: AssemblyOptions,
    normalizer: AxisNormalizer,
}

impl Default for SeriesAssembler {
    fn default() -> Self {
        Self::new(AssemblyOptions::default())
    }
}

impl SeriesAssembler {
    pub fn new(options: AssemblyOptions) -> Self {
        let normalizer = AxisNormalizer::new(options.normalizer);
        Self {
            options,
            normalizer,
        }
    }

    pub fn options(&self) -> &AssemblyOptions {
        &self.options
    }

    pub fn normalizer(&self) -> &AxisNormalizer {
        &self.normalizer
    }

    /// Group `slices` and assemble every series independently.
    ///
    /// A series that fails is skipped and reported as a warning; the call
    /// only fails when no series produced a volume.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when `slices` is empty or every series
    /// was skipped.
    pub fn assemble_all<T>(&self, slices: Vec<Slice<T>>) -> Result<Outcome<Vec<Volume<T>>>>
    where
        T: Clone + Send + Sync,
    {
        let groups = group(slices)?;
        tracing::debug!(series = groups.len(), "grouped slices");

        let results: Vec<(String, Result<Outcome<Volume<T>>>)> = if self.options.parallel {
            groups
                .into_par_iter()
                .map(|series| (series.id.clone(), self.assemble(series)))
                .collect()
        } else {
            groups
                .into_iter()
                .map(|series| (series.id.clone(), self.assemble(series)))
                .collect()
        };

        let mut outcome = Outcome::new(Vec::with_capacity(results.len()));
        for (series_id, result) in results {
            match result {
                Ok(assembled) => {
                    let volume = outcome.absorb(assembled);
                    outcome.value.push(volume);
                }
                Err(error) => {
                    tracing::warn!(%series_id, "skipping series");
                    outcome.warn(error);
                }
            }
        }

        if outcome.value.is_empty() {
            return Err(Error::NotFound("any series".into()));
        }
        Ok(outcome)
    }

    /// Assemble one series into a volume.
    ///
    /// Single slices become 2D volumes with an identity affine. Larger
    /// series are sorted, filtered to one in-plane shape, stacked along a
    /// trailing axis and normalized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SeriesDecode`] when no slice carries usable geometry
    /// and [`Error::DegenerateAffine`] when the stack cannot be normalized.
    pub fn assemble<T>(&self, mut series: Series<T>) -> Result<Outcome<Volume<T>>>
    where
        T: Clone,
    {
        let series_id = series.id.clone();
        if series.is_empty() {
            return Err(Error::series_decode(&series_id, "series has no slices"));
        }

        sort_slices(&mut series.slices, self.options.sort_by);
        let label = resolve_label(
            series.slices[0]
                .label_candidates
                .iter()
                .map(|candidate| candidate.as_deref()),
            &self.options.unknown_label,
        );

        if series.len() == 1 {
            return single_slice_volume(series.slices.remove(0), label).map(Outcome::new);
        }

        let mut outcome = Outcome::new(());
        let mut accepted: Vec<Slice<T>> = Vec::with_capacity(series.len());
        for slice in series.slices {
            if !slice.has_geometry() {
                outcome.warn(Error::series_decode(
                    &series_id,
                    format!("slice {} lacks position, orientation or spacing", slice.instance_index),
                ));
                continue;
            }
            if let Some(reference) = accepted.first() {
                if slice.shape() != reference.shape() {
                    outcome.warn(Error::SliceShapeMismatch {
                        series_id: series_id.clone(),
                        instance: slice.instance_index,
                        expected: reference.shape(),
                        actual: slice.shape(),
                    });
                    continue;
                }
            }
            accepted.push(slice);
        }

        if accepted.is_empty() {
            return Err(Error::series_decode(
                &series_id,
                "no slice carries usable geometry",
            ));
        }
        if accepted.len() == 1 {
            let volume = single_slice_volume(accepted.remove(0), label)?;
            return Ok(outcome.map(|_| volume));
        }

        let geometry = dicom_geometry(&accepted)
            .ok_or_else(|| Error::series_decode(&series_id, "missing slice geometry"))?;
        let affine = AffineBuilder::dicom(&geometry)
            .map_err(|e| Error::series_decode(&series_id, e.to_string()))?;

        let views: Vec<ArrayView2<'_, T>> = accepted.iter().map(|slice| slice.grid.view()).collect();
        let stacked = stack(Axis(2), &views)
            .map_err(|e| Error::series_decode(&series_id, e.to_string()))?
            .into_dyn();
        tracing::debug!(%series_id, shape = ?stacked.shape(), "stacked slices");

        let original = self
            .options
            .retain_original
            .then(|| OriginalGeometry {
                grid: stacked.clone(),
                affine,
                normalizer: *self.normalizer.options(),
            });
        let normalized = self.normalizer.forward(stacked, &affine)?;
        let (grid, normalized_affine) = outcome.absorb(normalized);

        let labels = axis_labels(&RAS_LABELS, grid.ndim());
        let mut volume = Volume::new(grid, normalized_affine, labels, label)?;
        if let Some(original) = original {
            volume = volume.with_original(original);
        }
        tracing::info!(%series_id, label = volume.label(), shape = ?volume.shape(), "assembled volume");
        Ok(outcome.map(|_| volume))
    }
}

fn dicom_geometry<T>(accepted: &[Slice<T>]) -> Option<DicomGeometry> {
    let first = accepted.first()?;
    let last = accepted.last()?;
    let (row_cosine, column_cosine) = first.orientation?;
    Some(DicomGeometry {
        first_position: first.position?,
        last_position: last.position?,
        row_cosine,
        column_cosine,
        pixel_spacing: first.pixel_spacing?,
        slice_count: accepted.len(),
    })
}

fn single_slice_volume<T>(slice: Slice<T>, label: String) -> Result<Volume<T>> {
    let grid = slice.grid.into_dyn();
    let labels = axis_labels(&RAS_LABELS, grid.ndim());
    Volume::new(grid, Affine::identity(), labels, label)
}
