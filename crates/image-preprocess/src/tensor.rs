//! Decoded image to model input tensor

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use tracing::debug;

use crate::PreprocessError;

/// Side of the square model input in pixels
pub const INPUT_SIZE: u32 = 224;

/// RGB
pub const INPUT_CHANNELS: usize = 3;

/// Preprocessing configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessConfig {
    /// Output width
    pub target_width: u32,
    /// Output height
    pub target_height: u32,
    /// Resampling filter used for the resize
    pub filter: FilterType,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            target_width: INPUT_SIZE,
            target_height: INPUT_SIZE,
            // Bicubic, the default filter of PIL's Image.resize
            filter: FilterType::CatmullRom,
        }
    }
}

/// Stateless bytes-to-tensor converter
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Decode any supported format and force 3-channel 8-bit RGB
    pub fn decode(&self, bytes: &[u8]) -> Result<RgbImage, PreprocessError> {
        if bytes.is_empty() {
            return Err(PreprocessError::EmptyInput);
        }

        let image = image::load_from_memory(bytes)?;
        debug!(
            "Decoded {}x{} {:?} image",
            image.width(),
            image.height(),
            image.color()
        );

        Ok(image.to_rgb8())
    }

    /// Stretch to the target size; aspect ratio is not preserved
    pub fn resize(&self, image: &RgbImage) -> RgbImage {
        if image.dimensions() == (self.config.target_width, self.config.target_height) {
            return image.clone();
        }
        imageops::resize(
            image,
            self.config.target_width,
            self.config.target_height,
            self.config.filter,
        )
    }

    /// `(1, height, width, 3)` tensor with values in `[0, 1]`
    pub fn to_tensor(image: &RgbImage) -> Result<Array4<f32>, PreprocessError> {
        let (width, height) = image.dimensions();
        let values = image.as_raw().iter().map(|&v| f32::from(v) / 255.0).collect();
        Ok(Array4::from_shape_vec(
            (1, height as usize, width as usize, INPUT_CHANNELS),
            values,
        )?)
    }

    /// Full pipeline: decode, RGB, resize, normalise, batch
    pub fn preprocess(&self, bytes: &[u8]) -> Result<Array4<f32>, PreprocessError> {
        let rgb = self.decode(bytes)?;
        let resized = self.resize(&rgb);
        Self::to_tensor(&resized)
    }
}

/// Preprocess with the default 224x224 configuration
pub fn preprocess(bytes: &[u8]) -> Result<Array4<f32>, PreprocessError> {
    Preprocessor::default().preprocess(bytes)
}
