//! Inference Engine Implementation

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use ndarray::Array4;
use tracing::{debug, info};

use crate::architecture::ArchitectureSpec;
use crate::network::LeafClassifier;
use crate::{InferenceBackend, InferenceError};

/// Anything that maps a `(1, 224, 224, 3)` image tensor to class probabilities.
///
/// Implementations must be read-only at inference time so a single instance
/// can serve concurrent requests.
pub trait Classifier: Send + Sync {
    /// Length of the probability vector `classify` returns
    fn num_classes(&self) -> usize;

    /// Probability per class, in model output order
    fn classify(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError>;
}

/// Result of inference operation
#[derive(Debug, Clone)]
pub struct InferenceResult {
    /// Probabilities for each class
    pub probabilities: Vec<f32>,
    /// Inference latency in milliseconds
    pub latency_ms: u64,
}

/// Shared handle to the loaded classifier
#[derive(Clone)]
pub struct InferenceEngine {
    classifier: Arc<dyn Classifier>,
    /// Weights file the classifier was loaded from
    model_path: PathBuf,
}

impl InferenceEngine {
    /// Rebuild the network and load its weights record. Any failure here is
    /// fatal for the caller: there is no fallback model.
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, InferenceError> {
        let model_path = model_path.as_ref();
        info!("Creating inference engine with model: {}", model_path.display());

        let start = Instant::now();
        let classifier = LeafClassifier::<InferenceBackend>::load(
            model_path,
            &ArchitectureSpec::cardamom(),
            Default::default(),
        )?;
        info!("Model loaded in {}ms", start.elapsed().as_millis());

        Ok(Self::with_classifier(Arc::new(classifier), model_path))
    }

    /// Wrap an already built classifier
    pub fn with_classifier(classifier: Arc<dyn Classifier>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            classifier,
            model_path: model_path.into(),
        }
    }

    /// Run one synchronous inference
    pub fn predict(&self, input: &Array4<f32>) -> Result<InferenceResult, InferenceError> {
        let start = Instant::now();

        let probabilities = self.classifier.classify(input)?;
        if probabilities.len() != self.num_classes() {
            return Err(InferenceError::InferenceFailed(format!(
                "classifier returned {} probabilities, expected {}",
                probabilities.len(),
                self.num_classes()
            )));
        }

        let latency_ms = start.elapsed().as_millis() as u64;
        debug!("Inference completed in {}ms", latency_ms);

        Ok(InferenceResult {
            probabilities,
            latency_ms,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.classifier.num_classes()
    }

    /// Text after the last path separator; empty when the path ends in one
    pub fn model_name(&self) -> String {
        self.model_path
            .to_string_lossy()
            .rsplit(std::path::is_separator)
            .next()
            .unwrap_or_default()
            .to_string()
    }
}
