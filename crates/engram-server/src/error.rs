//! HTTP error mapping
//!
//! Translates the engine's error taxonomy to status codes. Response bodies
//! carry the stable kind name and a safe message - provider stack traces
//! and store-native error names never reach a client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use engram_core::EngineError;

/// An error ready to leave the process.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            EngineError::DecryptionFailed(_) | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = Json(serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Handler result alias.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Wrap a handler body in its deadline budget; expiry surfaces as an
/// internal error rather than a hung connection.
pub async fn with_deadline<T, F>(budget: std::time::Duration, fut: F) -> ApiResult<T>
where
    F: std::future::Future<Output = ApiResult<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(ApiError(EngineError::Internal(
            "request deadline exceeded".into(),
        ))),
    }
}
