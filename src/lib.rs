//! # medical-volume
//!
//! Turns per-format medical imaging geometry into one canonical volume
//! representation with a consistent voxel-to-world mapping.
//!
//! DICOM slices are grouped by series, ordered, checked for a common
//! in-plane shape and stacked. NIfTI and NRRD headers contribute their
//! affine directly. Either way the resulting array and affine pass through
//! the [`AxisNormalizer`], which permutes and reflects them into a fixed
//! internal axis order, so display and measurement code never sees the
//! source convention. The normalization is exactly reversible, which is
//! what [`Volume::export`] relies on to hand a writer the on-disk layout.
//!
//! Failures are isolated at the smallest unit: a malformed slice is
//! dropped, a broken series is skipped, and both come back as warnings in an
//! [`Outcome`]. Only the total absence of usable data is an error.
//!
//! Binary decoding belongs to other crates; DICOM support is provided on
//! top of `dicom-rs`, other formats plug in through [`FormatReader`].
//!
//! # Examples
//!
//! ## Assembling a DICOM directory
//!
//! ```no_run
//! # use medical_volume::{AssemblyOptions, FormatRegistry};
//! # use std::path::Path;
//! let registry = FormatRegistry::<u16>::with_defaults(AssemblyOptions::default());
//! let outcome = registry
//!     .load(Path::new("dicom"))
//!     .expect("should have found at least one series");
//! for volume in &outcome.value {
//!     let frame = volume.frame().expect("should have an invertible affine");
//!     println!("{}: {:?} at {:?}", volume.label(), volume.shape(), frame.pixel_to_world([0.0; 3]));
//! }
//! ```
//!
//! ## Normalizing and restoring an array
//!
//! ```
//! # use medical_volume::{Affine, AxisNormalizer};
//! # use ndarray::Array3;
//! let affine = Affine::from_columns(
//!     [[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 2.0]],
//!     [0.0, 0.0, 0.0],
//! );
//! let array = Array3::<i16>::zeros((16, 16, 7)).into_dyn();
//! let normalizer = AxisNormalizer::default();
//! let (normalized, _) = normalizer.forward(array.clone(), &affine).unwrap().value;
//! assert_eq!(normalized.shape(), &[7, 16, 16]);
//! assert_eq!(normalizer.reverse(normalized, &affine).unwrap(), array);
//! ```

pub mod affine;
pub mod coordinates;
pub mod enums;
pub mod error;
pub mod normalizer;
pub mod options;
pub mod outcome;
pub mod registry;
pub mod series;
pub mod volume;
pub mod volume_loader;

pub use affine::{
    Affine, AffineBuilder, DicomGeometry, GeometryFields, NiftiGeometry, NrrdGeometry,
};
pub use coordinates::CoordinateFrame;
pub use enums::{Orientation, SortBy};
pub use error::{Error, Result};
pub use normalizer::{AxisNormalizer, NormalizationPlan};
pub use options::{AssemblyOptions, NormalizerOptions};
pub use outcome::Outcome;
pub use registry::{FormatReader, FormatRegistry, RawSource, RawVolume};
pub use series::{Series, SeriesAssembler, Slice, UNKNOWN_SERIES};
pub use volume::{OriginalGeometry, Volume};
pub use volume_loader::DicomReader;
