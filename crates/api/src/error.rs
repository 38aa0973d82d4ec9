//! Error types and their HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use diagnosis::DiagnosisError;
use image_preprocess::PreprocessError;
use inference_engine::InferenceError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Request-level failure, rendered as `{"error": "<message>"}`
#[derive(Debug, Error)]
pub enum ApiError {
    /// No multipart part named `image` carrying a file
    #[error("No image file provided")]
    MissingImage,

    #[error("Empty filename")]
    EmptyFilename,

    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),

    /// Decode, inference or composition failed
    #[error("{0}")]
    Processing(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingImage | ApiError::EmptyFilename => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Processing(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Prediction failed: {}", self);
        } else {
            warn!("Rejected request: {}", self);
        }

        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<PreprocessError> for ApiError {
    fn from(err: PreprocessError) -> Self {
        ApiError::Processing(err.to_string())
    }
}

impl From<InferenceError> for ApiError {
    fn from(err: InferenceError) -> Self {
        ApiError::Processing(err.to_string())
    }
}

impl From<DiagnosisError> for ApiError {
    fn from(err: DiagnosisError) -> Self {
        ApiError::Processing(err.to_string())
    }
}

/// Startup failure; the process exits instead of serving
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Failed to load model: {0}")]
    Model(#[from] InferenceError),

    #[error("Class catalog does not match model: {0}")]
    Catalog(#[from] DiagnosisError),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}
