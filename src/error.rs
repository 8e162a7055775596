use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No usable slices or volumes found in {0}")]
    NotFound(String),

    #[error("Failed to decode series {series_id}: {reason}")]
    SeriesDecode { series_id: String, reason: String },

    #[error(
        "Slice {instance} of series {series_id} has shape {actual:?}, expected {expected:?}"
    )]
    SliceShapeMismatch {
        series_id: String,
        instance: i64,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Degenerate affine: {0}")]
    DegenerateAffine(String),

    #[error("Expected at least {expected} axes, found {actual}")]
    InvalidRank { expected: usize, actual: usize },

    #[error("Got {labels} axis labels for rank {rank}")]
    LabelCount { labels: usize, rank: usize },

    #[error("Mask has shape {actual:?}, volume has {expected:?}")]
    MaskShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Unknown orientation token: {0}")]
    UnknownOrientation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

impl Error {
    /// Series identifier and slice instance a failure is about, if any.
    pub fn context(&self) -> (Option<&str>, Option<i64>) {
        match self {
            Error::SeriesDecode { series_id, .. } => (Some(series_id), None),
            Error::SliceShapeMismatch {
                series_id,
                instance,
                ..
            } => (Some(series_id), Some(*instance)),
            _ => (None, None),
        }
    }

    pub(crate) fn series_decode(series_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::SeriesDecode {
            series_id: series_id.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
