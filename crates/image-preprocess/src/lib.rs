//! Image Preprocessing for Leaf Classification
//!
//! Turns raw uploaded bytes into the `(1, 224, 224, 3)` f32 tensor the
//! classifier expects:
//! - decode any format the `image` crate understands
//! - force 3-channel RGB (alpha dropped, grayscale expanded)
//! - resize, not crop, to 224x224
//! - scale to `[0, 1]` and add the batch axis

pub mod tensor;

pub use tensor::{preprocess, Preprocessor, PreprocessConfig, INPUT_CHANNELS, INPUT_SIZE};

use thiserror::Error;

/// Preprocessing error types
#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Uploaded file is empty")]
    EmptyInput,

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}
