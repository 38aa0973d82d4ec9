//! Static metadata for each class the model predicts

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::DiagnosisError;

/// Class identifier, in model output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassId {
    /// Leaf blight
    #[serde(rename = "blight")]
    Blight,
    /// No disease
    #[serde(rename = "healthy")]
    Healthy,
    /// Phyllosticta leaf spot
    #[serde(rename = "Phylosticta_LS")]
    PhyllostictaLeafSpot,
}

impl ClassId {
    /// Every class, indexed like the model's output vector
    pub const ALL: [ClassId; 3] = [ClassId::Blight, ClassId::Healthy, ClassId::PhyllostictaLeafSpot];

    /// Canonical identifier used in API responses
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassId::Blight => "blight",
            ClassId::Healthy => "healthy",
            ClassId::PhyllostictaLeafSpot => "Phylosticta_LS",
        }
    }

    /// Human-readable name
    pub fn label(&self) -> &'static str {
        match self {
            ClassId::Blight => "Leaf Blight",
            ClassId::Healthy => "Healthy Leaf",
            ClassId::PhyllostictaLeafSpot => "Phyllosticta Leaf Spot",
        }
    }

    pub fn status(&self) -> HealthStatus {
        match self {
            ClassId::Healthy => HealthStatus::Healthy,
            ClassId::Blight | ClassId::PhyllostictaLeafSpot => HealthStatus::Diseased,
        }
    }

    /// Get recommended actions, most urgent first
    pub fn recommendations(&self) -> &'static [&'static str] {
        match self {
            ClassId::Blight => &[
                "Remove and destroy severely affected leaves immediately",
                "Apply copper-based fungicide (Bordeaux mixture 1%)",
                "Improve air circulation by thinning dense canopy",
                "Avoid overhead irrigation — use drip instead",
                "Monitor surrounding plants for early signs of spread",
            ],
            ClassId::Healthy => &[
                "Plant is in excellent health — no action needed",
                "Continue current watering and fertilization schedule",
                "Monitor regularly for any changes in leaf color or texture",
            ],
            ClassId::PhyllostictaLeafSpot => &[
                "Prune and remove infected leaves to limit inoculum",
                "Apply Mancozeb 75 WP (2 g/L) or Carbendazim spray",
                "Ensure proper drainage around the plant base",
                "Avoid water-splash on leaves during irrigation",
                "Apply potassium-rich fertilizer to boost leaf resistance",
            ],
        }
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a class means the plant needs treatment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Diseased,
}

/// Display metadata for one class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassInfo {
    pub id: ClassId,
    pub label: &'static str,
    pub status: HealthStatus,
    pub recommendations: &'static [&'static str],
}

impl From<ClassId> for ClassInfo {
    fn from(id: ClassId) -> Self {
        Self {
            id,
            label: id.label(),
            status: id.status(),
            recommendations: id.recommendations(),
        }
    }
}

/// Immutable class table, position `i` describes model output `i`
#[derive(Debug, Clone)]
pub struct ClassCatalog {
    classes: Vec<ClassInfo>,
}

impl ClassCatalog {
    /// The three cardamom leaf classes
    pub fn cardamom() -> Self {
        Self {
            classes: ClassId::ALL.into_iter().map(ClassInfo::from).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Metadata for model output index `index`
    pub fn get(&self, index: usize) -> Option<&ClassInfo> {
        self.classes.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.iter()
    }

    /// Check the catalog covers exactly the model's output cardinality.
    /// Called once at startup; a mismatch must stop the service.
    pub fn ensure_matches(&self, num_classes: usize) -> Result<(), DiagnosisError> {
        if num_classes != self.classes.len() {
            return Err(DiagnosisError::ClassCountMismatch {
                expected: self.classes.len(),
                actual: num_classes,
            });
        }
        debug!("Class catalog covers all {} model outputs", num_classes);
        Ok(())
    }
}

impl Default for ClassCatalog {
    fn default() -> Self {
        Self::cardamom()
    }
}
