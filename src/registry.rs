//! Format detection and dispatch.
//!
//! Hosts register one [`FormatReader`] per file format; the registry asks
//! each in priority order whether it recognises a source and hands the
//! decoded records to the assembler or the affine builder.

use crate::affine::{AffineBuilder, GeometryFields};
use crate::error::{Error, Result};
use crate::normalizer::AxisNormalizer;
use crate::options::AssemblyOptions;
use crate::outcome::Outcome;
use crate::series::{SeriesAssembler, Slice};
use crate::volume::{NRRD_LABELS, OriginalGeometry, RAS_LABELS, Volume, axis_labels};
use crate::volume_loader::DicomReader;

use ndarray::ArrayD;
use std::cmp::Reverse;
use std::path::Path;

/// A single-shot volume as handed over by a NIfTI or NRRD decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct RawVolume<T> {
    pub grid: ArrayD<T>,
    pub geometry: GeometryFields,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawSource<T> {
    Slices(Vec<Slice<T>>),
    Volume(RawVolume<T>),
}

pub trait FormatReader<T>: Send + Sync {
    fn name(&self) -> &str;

    /// Higher values are asked first.
    fn priority(&self) -> i32 {
        100
    }

    fn detect(&self, source: &Path) -> bool;

    fn read(&self, source: &Path) -> Result<Outcome<RawSource<T>>>;
}

/// File name before the first `.nii`.
pub fn nifti_label(path: impl AsRef<Path>) -> String {
    label_before(path.as_ref(), ".nii")
}

/// File name before the first `.nrrd`.
pub fn nrrd_label(path: impl AsRef<Path>) -> String {
    label_before(path.as_ref(), ".nrrd")
}

fn label_before(path: &Path, marker: &str) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.find(marker) {
        Some(end) => name[..end].to_string(),
        None => name,
    }
}

/// Build and normalize a volume from single-shot geometry.
pub fn build_volume<T>(
    raw: RawVolume<T>,
    normalizer: &AxisNormalizer,
    retain_original: bool,
) -> Result<Outcome<Volume<T>>>
where
    T: Clone,
{
    let spatial = match raw.geometry {
        GeometryFields::Nifti(_) => &RAS_LABELS,
        GeometryFields::Nrrd(_) => &NRRD_LABELS,
    };
    let (grid, affine) = AffineBuilder::build(&raw.label, &raw.geometry, raw.grid)?;

    if grid.ndim() < 3 {
        let labels = axis_labels(spatial, grid.ndim());
        return Volume::new(grid, affine, labels, raw.label).map(Outcome::new);
    }

    let original = retain_original.then(|| OriginalGeometry {
        grid: grid.clone(),
        affine,
        normalizer: *normalizer.options(),
    });
    let mut outcome = Outcome::new(());
    let (grid, normalized) = outcome.absorb(normalizer.forward(grid, &affine)?);
    let labels = axis_labels(spatial, grid.ndim());
    let mut volume = Volume::new(grid, normalized, labels, raw.label)?;
    if let Some(original) = original {
        volume = volume.with_original(original);
    }
    tracing::info!(label = volume.label(), shape = ?volume.shape(), "built volume");
    Ok(outcome.map(|_| volume))
}

pub struct FormatRegistry<T> {
    readers: Vec<Box<dyn FormatReader<T>>>,
    assembler: SeriesAssembler,
}

impl<T> FormatRegistry<T> {
    pub fn new(options: AssemblyOptions) -> Self {
        Self {
            readers: Vec::new(),
            assembler: SeriesAssembler::new(options),
        }
    }

    /// Add a reader. Readers of equal priority keep registration order.
    pub fn register(&mut self, reader: impl FormatReader<T> + 'static) -> &mut Self {
        self.readers.push(Box::new(reader));
        self.readers.sort_by_key(|reader| Reverse(reader.priority()));
        self
    }

    pub fn readers(&self) -> impl Iterator<Item = &dyn FormatReader<T>> {
        self.readers.iter().map(|reader| reader.as_ref())
    }

    pub fn assembler(&self) -> &SeriesAssembler {
        &self.assembler
    }

    pub fn detect(&self, source: &Path) -> Option<&dyn FormatReader<T>> {
        self.readers().find(|reader| reader.detect(source))
    }
}

impl<T> FormatRegistry<T>
where
    T: Clone + Send + Sync,
{
    /// Read `source` with the first reader that recognises it and turn the
    /// result into volumes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no reader recognises `source` or no
    /// volume could be assembled, and passes on the reader's own failure.
    pub fn load(&self, source: &Path) -> Result<Outcome<Vec<Volume<T>>>> {
        let reader = self
            .detect(source)
            .ok_or_else(|| Error::NotFound(source.display().to_string()))?;
        tracing::debug!(reader = reader.name(), source = %source.display(), "reading source");

        let mut outcome = Outcome::new(());
        let raw = outcome.absorb(reader.read(source)?);
        let volumes = match raw {
            RawSource::Slices(slices) => outcome.absorb(self.assembler.assemble_all(slices)?),
            RawSource::Volume(raw) => {
                let options = self.assembler.options();
                vec![outcome.absorb(build_volume(
                    raw,
                    self.assembler.normalizer(),
                    options.retain_original,
                )?)]
            }
        };
        Ok(outcome.map(|_| volumes))
    }
}

impl FormatRegistry<u16> {
    /// A registry that understands DICOM files and directories.
    pub fn with_defaults(options: AssemblyOptions) -> Self {
        let mut registry = Self::new(options);
        registry.register(DicomReader::default());
        registry
    }
}
