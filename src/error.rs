use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failure while turning transport bytes into a usable image.
///
/// These are expected on noisy input: the streaming path drops the frame and
/// keeps the connection open, the one-shot path escalates (see [`ServiceError`]).
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("empty image payload")]
    Empty,
    #[error("unrecognized image bytes: {0}")]
    Image(#[from] image::ImageError),
    #[error("image has zero width or height")]
    Degenerate,
}

/// Service-level error taxonomy shared by both pipelines.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("el modelo de deteccion no esta cargado")]
    ModelUnavailable,
    #[error("el archivo subido no es una imagen: {0}")]
    UnsupportedMediaType(String),
    #[error("error al decodificar la imagen: {0}")]
    FrameDecode(#[from] FrameDecodeError),
    #[error("error de inferencia: {0}")]
    Inference(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            // Decode failures in the one-shot path keep the source's generic
            // server-error policy; the streaming path never surfaces them.
            ServiceError::FrameDecode(_) | ServiceError::Inference(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_error_class() {
        assert_eq!(
            ServiceError::ModelUnavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::UnsupportedMediaType("text/plain".into()).status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            ServiceError::BadRequest("no file".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::FrameDecode(FrameDecodeError::Empty).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::Inference("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
