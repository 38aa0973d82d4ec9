//! End-to-end tests against the router, without a listening socket

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use api::{create_router, AppConfig, AppState};
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use diagnosis::{ClassCatalog, ClassId};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use inference_engine::{ArchitectureSpec, Classifier, InferenceBackend, InferenceEngine, InferenceError, LeafNet};
use ndarray::Array4;
use serde_json::Value;
use tower::ServiceExt;

const BOUNDARY: &str = "----leafuploadboundary";
const MODEL_PATH: &str = "/opt/elacare/models/elacare_cardamom_model.mpk";

struct StubClassifier(Vec<f32>);

impl Classifier for StubClassifier {
    fn num_classes(&self) -> usize {
        self.0.len()
    }

    fn classify(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        assert_eq!(input.shape(), &[1, 224, 224, 3]);
        Ok(self.0.clone())
    }
}

fn app_with(probabilities: Vec<f32>, max_upload_bytes: usize) -> Router {
    let engine = InferenceEngine::with_classifier(Arc::new(StubClassifier(probabilities)), MODEL_PATH);
    let state = AppState::new(engine, ClassCatalog::cardamom()).unwrap();
    create_router(Arc::new(state), max_upload_bytes)
}

fn app(probabilities: Vec<f32>) -> Router {
    app_with(probabilities, 1024 * 1024)
}

fn leaf_png() -> Vec<u8> {
    let leaf = RgbImage::from_fn(120, 90, |x, y| Rgb([(x * 2) as u8, 160, (y * 2) as u8]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(leaf).write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

/// `(field name, filename, content)` per part
fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn predict_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/predict")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn health_request() -> Request<Body> {
    Request::builder().uri("/api/health").body(Body::empty()).unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health_reports_model_basename() {
    let (status, body) = send(app(vec![0.2, 0.6, 0.2]), health_request()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model"], "elacare_cardamom_model.mpk");
}

#[tokio::test]
async fn test_predict_healthy_leaf() {
    let png = leaf_png();
    let request = predict_request(multipart_body(&[("image", Some("leaf.png"), &png)]));
    let (status, body) = send(app(vec![0.03, 0.95, 0.02]), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["class"], "healthy");
    assert_eq!(body["label"], "Healthy Leaf");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["confidence"], 95.0);
    assert_eq!(body["recommendations"].as_array().unwrap().len(), 3);
    assert_eq!(body["recommendations"][0], ClassId::Healthy.recommendations()[0]);
    assert_eq!(body["confidence"], body["all_predictions"]["healthy"]);
}

#[tokio::test]
async fn test_predict_blight_leaf() {
    let png = leaf_png();
    let request = predict_request(multipart_body(&[("image", Some("field_photo.png"), &png)]));
    let (status, body) = send(app(vec![0.81, 0.09, 0.10]), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["class"], "blight");
    assert_eq!(body["status"], "diseased");
    assert_eq!(body["recommendations"].as_array().unwrap().len(), 5);

    let all = body["all_predictions"].as_object().unwrap();
    let keys: Vec<&str> = all.keys().map(String::as_str).collect();
    assert_eq!(keys.len(), 3);
    for id in ClassId::ALL {
        assert!(keys.contains(&id.as_str()));
    }
    assert_eq!(all["blight"], 81.0);
    assert_eq!(all["healthy"], 9.0);
    assert_eq!(all["Phylosticta_LS"], 10.0);
}

#[tokio::test]
async fn test_image_field_found_among_other_parts() {
    let png = leaf_png();
    let request = predict_request(multipart_body(&[
        ("notes", None, b"taken at dawn".as_slice()),
        ("image", Some("leaf.png"), &png),
    ]));
    let (status, body) = send(app(vec![0.1, 0.2, 0.7]), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["class"], "Phylosticta_LS");
    assert_eq!(body["label"], "Phyllosticta Leaf Spot");
}

#[tokio::test]
async fn test_missing_image_field() {
    let png = leaf_png();
    let request = predict_request(multipart_body(&[("photo", Some("leaf.png"), &png)]));
    let (status, body) = send(app(vec![0.3, 0.4, 0.3]), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No image file provided");
}

#[tokio::test]
async fn test_image_text_field_is_not_a_file() {
    let request = predict_request(multipart_body(&[("image", None, b"leaf.png".as_slice())]));
    let (status, body) = send(app(vec![0.3, 0.4, 0.3]), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No image file provided");
}

#[tokio::test]
async fn test_empty_filename() {
    let png = leaf_png();
    let request = predict_request(multipart_body(&[("image", Some(""), &png)]));
    let (status, body) = send(app(vec![0.3, 0.4, 0.3]), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Empty filename");
}

#[tokio::test]
async fn test_non_multipart_request() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"image": "leaf.png"}"#))
        .unwrap();
    let (status, body) = send(app(vec![0.3, 0.4, 0.3]), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No image file provided");
}

#[tokio::test]
async fn test_undecodable_upload_does_not_break_service() {
    let app = app(vec![0.3, 0.4, 0.3]);
    let request = predict_request(multipart_body(&[(
        "image",
        Some("report.pdf"),
        b"%PDF-1.4 definitely not a leaf".as_slice(),
    )]));

    let (status, body) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body["error"].as_str().unwrap().is_empty());

    let (status, body) = send(app.clone(), health_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let png = leaf_png();
    let request = predict_request(multipart_body(&[("image", Some("leaf.png"), &png)]));
    let (status, _) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_upload_over_limit() {
    let oversized = vec![0x42u8; 8 * 1024];
    let request = predict_request(multipart_body(&[("image", Some("huge.png"), &oversized)]));
    let (status, body) = send(app_with(vec![0.3, 0.4, 0.3], 1024), request).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(!body["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let request = Request::builder()
        .uri("/api/health")
        .header(header::ORIGIN, "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app(vec![0.2, 0.6, 0.2]).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

#[test]
fn test_catalog_mismatch_refused() {
    let engine = InferenceEngine::with_classifier(Arc::new(StubClassifier(vec![0.5, 0.5])), MODEL_PATH);
    assert!(AppState::new(engine, ClassCatalog::cardamom()).is_err());
}

#[tokio::test]
async fn test_end_to_end_with_weights_record() {
    let path: PathBuf = std::env::temp_dir().join(format!("leaf-api-e2e-{}.mpk", std::process::id()));
    let net = LeafNet::<InferenceBackend>::new(&ArchitectureSpec::cardamom(), &Default::default());
    let written = net.save(&path).unwrap();
    assert_eq!(written, path);

    let config = AppConfig {
        model_path: path.clone(),
        ..AppConfig::default()
    };
    let state = AppState::load(&config).unwrap();
    let app = create_router(Arc::new(state), config.max_upload_bytes);

    let png = leaf_png();
    let request = predict_request(multipart_body(&[("image", Some("leaf.png"), &png)]));
    let (status, body) = send(app.clone(), request).await;
    std::fs::remove_file(&path).ok();

    assert_eq!(status, StatusCode::OK);
    let class = body["class"].as_str().unwrap();
    assert!(ClassId::ALL.iter().any(|id| id.as_str() == class));
    assert_eq!(body["confidence"], body["all_predictions"][class]);

    let total: f64 = body["all_predictions"]
        .as_object()
        .unwrap()
        .values()
        .map(|v| v.as_f64().unwrap())
        .sum();
    assert!((total - 100.0).abs() <= 0.3);

    let (_, health) = send(app, health_request()).await;
    assert_eq!(health["model"], path.file_name().unwrap().to_str().unwrap());
}
