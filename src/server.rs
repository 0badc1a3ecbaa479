use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::analyze::{self, AnalysisResponse};
use crate::config::Config;
use crate::detector::DetectorHandle;
use crate::error::ServiceError;
use crate::stream;

/// Shared state backing the HTTP handlers.
pub struct AppState {
    pub detector: DetectorHandle,
    pub index: PathBuf,
}

impl AppState {
    pub fn new(detector: DetectorHandle, config: &Config) -> Arc<Self> {
        Arc::new(AppState {
            detector,
            index: config.index.clone(),
        })
    }
}

pub fn router(state: Arc<AppState>, static_dir: &Path) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/analyze_image/", post(analyze_image))
        .route("/download_annotated_image/", get(download_annotated_image))
        .route("/ws", get(ws_upgrade))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the frontend page. The page renders regardless of detector state;
/// only a missing file is an error.
async fn index(State(state): State<Arc<AppState>>) -> Result<Html<String>, ServiceError> {
    tokio::fs::read_to_string(&state.index)
        .await
        .map(Html)
        .map_err(|_| ServiceError::Internal("index.html no encontrado en la ruta esperada.".into()))
}

/// One-shot analysis of a multipart image upload.
async fn analyze_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisResponse>, ServiceError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ServiceError::BadRequest(format!("formulario multipart invalido: {err}")))?
    {
        if field.name() == Some("file") {
            let content_type = field.content_type().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|err| ServiceError::BadRequest(format!("no se pudo leer el archivo: {err}")))?;
            upload = Some((bytes, content_type));
            break;
        }
    }
    let (bytes, content_type) =
        upload.ok_or_else(|| ServiceError::BadRequest("falta el campo 'file'".into()))?;

    // Inference is CPU-bound; keep it off the reactor threads.
    let response = tokio::task::spawn_blocking(move || {
        analyze::analyze(&state.detector, &bytes, content_type.as_deref())
    })
    .await
    .map_err(|err| ServiceError::Internal(format!("analysis task failed: {err}")))??;

    Ok(Json(response))
}

#[derive(Deserialize)]
struct DownloadQuery {
    image_data: String,
}

/// Stream previously-annotated image bytes back to the client.
async fn download_annotated_image(
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ServiceError> {
    let bytes = decode_query_payload(&query.image_data)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response())
}

fn decode_query_payload(raw: &str) -> Result<Vec<u8>, ServiceError> {
    // '+' arrives as a space when the client does not percent-encode the
    // payload; spaces are never valid base64, so mapping them back is safe.
    let cleaned = raw.trim().replace(' ', "+");
    BASE64
        .decode(cleaned)
        .map_err(|_| ServiceError::BadRequest("Datos de imagen base64 invalidos.".into()))
}

/// Upgrade to the streaming analysis session.
async fn ws_upgrade(State(state): State<Arc<AppState>>, upgrade: WebSocketUpgrade) -> Response {
    let detector = state.detector.clone();
    upgrade.on_upgrade(move |socket| stream::run_session(socket, detector))
}
