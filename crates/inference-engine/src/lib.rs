//! Leaf Classifier Inference Engine
//!
//! Rebuilds the fixed MobileNetV2 + dense-head topology the cardamom model
//! was trained with as burn modules, loads its weights from a record file
//! and runs a deterministic forward pass on the ndarray backend.

pub mod architecture;
mod engine;
#[cfg(feature = "convert")]
pub mod keras_h5;
pub mod layers;
mod network;
pub mod weights;

pub use architecture::{ArchitectureSpec, BlockSpec, StageSpec, TensorSpec};
pub use engine::{Classifier, InferenceEngine, InferenceResult};
pub use network::{InvertedResidual, LeafClassifier, LeafNet, LeafRecorder, RECORD_EXTENSION};
pub use weights::{keras_tensor_name, KerasWeights, NamedTensor, WeightReader};

use thiserror::Error;

/// CPU backend the server runs the network on
pub type InferenceBackend = burn::backend::NdArray;

/// Errors while loading weights or running inference
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Weights file not found: {0}")]
    WeightsNotFound(String),
    #[error("Weight record error: {0}")]
    Record(String),
    #[error("Model load failed: {0}")]
    ModelLoadError(String),
    #[error("Missing weight tensor: {0}")]
    MissingWeight(String),
    #[error("Weight shape mismatch for {name}: expected {expected}, got {actual}")]
    WeightShapeMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("Keras weights hold tensors the architecture does not use: {0}")]
    UnexpectedWeights(String),
    #[error("Invalid input shape: expected {expected}, got {actual}")]
    InvalidInputShape { expected: String, actual: String },
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
}
