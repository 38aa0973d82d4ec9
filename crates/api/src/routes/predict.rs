//! Leaf photo upload and classification

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use diagnosis::Diagnosis;
use tracing::{debug, info};

use crate::{ApiError, AppState};

/// Multipart part that carries the photo
pub const IMAGE_FIELD: &str = "image";

struct ImageUpload {
    filename: String,
    bytes: Bytes,
}

/// Classify an uploaded leaf photo
pub async fn predict_handler(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Diagnosis>, ApiError> {
    let mut multipart = multipart.map_err(|rejection| {
        debug!("Not a multipart upload: {}", rejection);
        ApiError::MissingImage
    })?;

    let upload = read_image_field(&mut multipart).await?;
    debug!("Received {} ({} bytes)", upload.filename, upload.bytes.len());

    // Decode and forward pass are CPU bound
    let worker = Arc::clone(&state);
    let diagnosis = tokio::task::spawn_blocking(move || diagnose(&worker, &upload.bytes))
        .await
        .map_err(|e| ApiError::Internal(format!("prediction task failed: {}", e)))??;

    Ok(Json(diagnosis))
}

/// First part named `image` that has a filename
async fn read_image_field(multipart: &mut Multipart) -> Result<ImageUpload, ApiError> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(ApiError::MissingImage),
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(ApiError::PayloadTooLarge(e.body_text()))
            }
            Err(e) => {
                debug!("Malformed multipart body: {}", e);
                return Err(ApiError::MissingImage);
            }
        };

        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        // A plain form value named `image` is not a file
        let Some(filename) = field.file_name().map(str::to_owned) else {
            continue;
        };
        if filename.is_empty() {
            return Err(ApiError::EmptyFilename);
        }

        let bytes = field.bytes().await.map_err(read_error)?;
        return Ok(ImageUpload { filename, bytes });
    }
}

fn read_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::Processing(e.body_text())
    }
}

/// Preprocess, classify and compose the response
fn diagnose(state: &AppState, bytes: &[u8]) -> Result<Diagnosis, ApiError> {
    let input = state.preprocessor.preprocess(bytes)?;
    let result = state.engine.predict(&input)?;
    let diagnosis = state.catalog.diagnose(&result.probabilities)?;

    info!(
        "Predicted {} ({:.1}%) in {}ms",
        diagnosis.class_id, diagnosis.confidence, result.latency_ms
    );
    Ok(diagnosis)
}
