//! Leaf Diagnosis
//!
//! Maps the classifier's probability vector onto user-facing results:
//! the static class catalog (labels, health status, recommendations) and
//! the per-request `Diagnosis` returned by the API.

mod catalog;
mod report;

pub use catalog::{ClassCatalog, ClassId, ClassInfo, HealthStatus};
pub use report::{argmax, to_percent, ClassBreakdown, Diagnosis};

use thiserror::Error;

/// Errors mapping model output to a diagnosis
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DiagnosisError {
    /// Model output cardinality disagrees with the catalog
    #[error("Model produces {actual} classes but the catalog defines {expected}")]
    ClassCountMismatch { expected: usize, actual: usize },

    #[error("Prediction contains a non-finite probability at index {0}")]
    NonFiniteProbability(usize),

    #[error("Prediction is empty")]
    EmptyPrediction,
}
