use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use cascade_core::{CascadeError, ErrorKind};
use serde_json::{json, Value};

/// Seconds a client should wait before retrying a transient failure.
const RETRY_AFTER_SECS: &str = "1";

/// A core failure on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub CascadeError);

impl From<CascadeError> for ApiError {
    fn from(e: CascadeError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
            ErrorKind::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::CompilationError
            | ErrorKind::TessellationError
            | ErrorKind::InvalidMesh
            | ErrorKind::ExportError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::PoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::WorkerLost => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// `{error, message, logs?}`
    pub fn body(&self) -> Value {
        let mut body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        let logs = self.0.logs();
        if !logs.is_empty() {
            body["logs"] = json!(logs);
        }
        body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, "{}", self.0);
        }
        let mut response = (status, Json(self.body())).into_response();
        if self.0.is_retryable() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        response
    }
}
