//! Probability vector to API-facing diagnosis

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::catalog::{ClassCatalog, ClassId, HealthStatus};
use crate::DiagnosisError;

/// Probability as a percentage rounded to one decimal, halves to even
pub fn to_percent(probability: f32) -> f64 {
    (f64::from(probability) * 100.0 * 10.0).round_ties_even() / 10.0
}

/// Index of the largest value; ties go to the lowest index
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &value) in values.iter().enumerate() {
        match best {
            Some((_, top)) if value <= top => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}

/// Percentage per class in catalog order; serializes as a JSON object
#[derive(Debug, Clone, PartialEq)]
pub struct ClassBreakdown(Vec<(ClassId, f64)>);

impl ClassBreakdown {
    pub fn get(&self, id: ClassId) -> Option<f64> {
        self.0.iter().find(|(class, _)| *class == id).map(|&(_, pct)| pct)
    }

    pub fn total(&self) -> f64 {
        self.0.iter().map(|&(_, pct)| pct).sum()
    }
}

impl Serialize for ClassBreakdown {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(class, pct)| (class.as_str(), pct)))
    }
}

/// Response body of a successful prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnosis {
    #[serde(rename = "class")]
    pub class_id: ClassId,
    pub label: &'static str,
    /// Predicted class probability, percent, one decimal
    pub confidence: f64,
    pub status: HealthStatus,
    pub recommendations: &'static [&'static str],
    pub all_predictions: ClassBreakdown,
}

impl Diagnosis {
    /// Pick the top class and attach its catalog metadata
    pub fn from_probabilities(catalog: &ClassCatalog, probabilities: &[f32]) -> Result<Self, DiagnosisError> {
        if probabilities.is_empty() {
            return Err(DiagnosisError::EmptyPrediction);
        }
        catalog.ensure_matches(probabilities.len())?;
        if let Some(index) = probabilities.iter().position(|p| !p.is_finite()) {
            return Err(DiagnosisError::NonFiniteProbability(index));
        }

        let top = argmax(probabilities).ok_or(DiagnosisError::EmptyPrediction)?;
        let info = catalog.get(top).ok_or(DiagnosisError::ClassCountMismatch {
            expected: catalog.len(),
            actual: probabilities.len(),
        })?;

        let all_predictions = ClassBreakdown(
            catalog
                .iter()
                .zip(probabilities)
                .map(|(class, &p)| (class.id, to_percent(p)))
                .collect(),
        );
        let confidence = to_percent(probabilities[top]);

        debug!("Predicted {} ({:.1}%)", info.id, confidence);

        Ok(Self {
            class_id: info.id,
            label: info.label,
            confidence,
            status: info.status,
            recommendations: info.recommendations,
            all_predictions,
        })
    }
}

impl ClassCatalog {
    /// Shorthand for [`Diagnosis::from_probabilities`]
    pub fn diagnose(&self, probabilities: &[f32]) -> Result<Diagnosis, DiagnosisError> {
        Diagnosis::from_probabilities(self, probabilities)
    }
}
