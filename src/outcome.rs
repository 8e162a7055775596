//! Results that carry non-fatal warnings next to their value.

use crate::error::Error;

/// A successful value plus every recoverable failure met while producing it.
///
/// Dropped slices and skipped series end up in `warnings`; the caller decides
/// whether to show, log or ignore them.
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<Error>,
}

impl<T> Outcome<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(value: T, warnings: Vec<Error>) -> Self {
        Self { value, warnings }
    }

    /// Record a warning and emit it through `tracing`, with the series and
    /// instance it concerns as separate fields.
    pub fn warn(&mut self, warning: Error) {
        match warning.context() {
            (Some(series_id), Some(instance)) => {
                tracing::warn!(series_id, instance, %warning, "recoverable failure")
            }
            (Some(series_id), None) => tracing::warn!(series_id, %warning, "recoverable failure"),
            _ => tracing::warn!(%warning, "recoverable failure"),
        }
        self.warnings.push(warning);
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            warnings: self.warnings,
        }
    }

    /// Move the warnings of `other` into `self` and hand back its value.
    pub fn absorb<U>(&mut self, other: Outcome<U>) -> U {
        self.warnings.extend(other.warnings);
        other.value
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn into_parts(self) -> (T, Vec<Error>) {
        (self.value, self.warnings)
    }
}
