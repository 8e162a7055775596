use crate::enums::SortBy;
use crate::series::UNKNOWN_SERIES;

/// Thresholds used when deriving the axis permutation from an affine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizerOptions {
    /// A 3x3 determinant at or below this magnitude is treated as singular.
    pub singular_epsilon: f64,
    /// Relative gap under which a runner-up loading is reported as a near tie.
    pub tie_tolerance: f64,
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        Self {
            singular_epsilon: 1e-9,
            tie_tolerance: 1e-3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssemblyOptions {
    pub sort_by: SortBy,
    /// Label used when no descriptive candidate is present.
    pub unknown_label: String,
    /// Keep the pre-normalization grid and affine for export.
    pub retain_original: bool,
    /// Assemble independent series on the rayon pool.
    pub parallel: bool,
    pub normalizer: NormalizerOptions,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            sort_by: SortBy::default(),
            unknown_label: UNKNOWN_SERIES.to_string(),
            retain_original: true,
            parallel: true,
            normalizer: NormalizerOptions::default(),
        }
    }
}
