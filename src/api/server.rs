//! HTTP server implementation for the API

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{info, warn};

use super::handlers;
use super::models::{AudioParams, ErrorBody, KeyframeParams};
use crate::config::Config;
use crate::error::RelayError;
use crate::event::StreamEvent;
use crate::job::JobRunner;
use crate::storage::UploadStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub runner: JobRunner,
    pub store: UploadStore,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        let runner = JobRunner::new(config.ffmpeg.clone(), config.server.max_concurrent_jobs);
        let store = UploadStore::new(&config.storage.static_dir, &config.storage.uploads_dir);
        Self { config, runner, store }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    // Configure CORS to allow browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let static_files = ServeDir::new(&state.config.storage.static_dir);
    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/health", get(health_handler))
        .route("/audio", post(audio_handler))
        .route("/keyframes", post(keyframes_handler))
        // Uploads and extracted outputs are addressed by their normalized paths
        .fallback_service(static_files)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Serve on an already bound listener
pub async fn serve(listener: TcpListener, config: Arc<Config>) -> Result<()> {
    let app = router(AppState::new(config));
    axum::serve(listener, app).await?;
    Ok(())
}

/// Configure and start the HTTP server
pub async fn start_http_server(config: Arc<Config>) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tokio::fs::create_dir_all(config.uploads_root()).await?;

    let listener = TcpListener::bind(&addr).await?;
    info!("🌐 Running at http://{}", listener.local_addr()?);
    info!("📂 Serving static files from {}", config.storage.static_dir.display());

    serve(listener, config).await
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(handlers::health_check().await)
}

/// Audio extraction handler
async fn audio_handler(
    State(state): State<AppState>,
    Query(params): Query<AudioParams>,
    multipart: Multipart,
) -> Response {
    match handlers::start_audio_job(&state, params.bitrate, multipart).await {
        Ok(events) => event_stream(events),
        Err(e) => error_response(e),
    }
}

/// Keyframe extraction handler
async fn keyframes_handler(
    State(state): State<AppState>,
    Query(params): Query<KeyframeParams>,
    multipart: Multipart,
) -> Response {
    match handlers::start_keyframe_job(&state, params.gap, multipart).await {
        Ok(events) => event_stream(events),
        Err(e) => error_response(e),
    }
}

/// Relay job events to the client as a server-push stream
fn event_stream(events: mpsc::UnboundedReceiver<StreamEvent>) -> Response {
    let stream = futures::stream::unfold(events, |mut events| async move {
        let event = events.recv().await?;
        Some((Event::default().json_data(&event), events))
    });

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

fn error_response(err: RelayError) -> Response {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    warn!("Request failed ({}): {}", status, err);
    (status, Json(ErrorBody { error: err.to_string() })).into_response()
}
