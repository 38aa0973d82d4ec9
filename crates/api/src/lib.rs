//! Cardamom Leaf Diagnosis API Server
//!
//! Accepts leaf photos over multipart upload and answers with the predicted
//! disease class, confidence and care recommendations.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use diagnosis::{ClassCatalog, DiagnosisError};
use image_preprocess::Preprocessor;
use inference_engine::InferenceEngine;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub mod config;
pub mod error;
mod routes;

pub use config::AppConfig;
pub use error::{ApiError, ServerError};
pub use routes::health::HealthResponse;

/// Application state shared across handlers; read-only after startup
pub struct AppState {
    /// Loaded classifier
    pub engine: InferenceEngine,
    /// Class metadata, same order as model outputs
    pub catalog: ClassCatalog,
    pub preprocessor: Preprocessor,
}

impl AppState {
    /// Pair an engine with a catalog, refusing a class-count mismatch
    pub fn new(engine: InferenceEngine, catalog: ClassCatalog) -> Result<Self, DiagnosisError> {
        catalog.ensure_matches(engine.num_classes())?;
        Ok(Self {
            engine,
            catalog,
            preprocessor: Preprocessor::default(),
        })
    }

    /// Load the weights named by `config`
    pub fn load(config: &AppConfig) -> Result<Self, ServerError> {
        let engine = InferenceEngine::load(&config.model_path)?;
        Ok(Self::new(engine, ClassCatalog::cardamom())?)
    }
}

/// Create the application router
pub fn create_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/predict", post(routes::predict::predict_handler))
        .route("/api/health", get(routes::health::health_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Initialize logging
pub fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        warn!("Tracing subscriber already installed");
    }
}

/// Load the model and serve until Ctrl-C
pub async fn run_server(config: AppConfig) -> Result<(), ServerError> {
    info!(
        "Configuration: model={}, bind={}, max_upload={} bytes",
        config.model_path.display(),
        config.bind_addr,
        config.max_upload_bytes
    );

    let state = Arc::new(AppState::load(&config)?);
    info!(
        "Serving {} classes from {}",
        state.catalog.len(),
        state.engine.model_name()
    );
    let app = create_router(state, config.max_upload_bytes);

    info!("Starting API server on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
