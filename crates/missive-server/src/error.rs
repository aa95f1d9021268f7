use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

use missive_shared::{CryptoError, RequestId};
use missive_store::StoreError;

/// Error taxonomy for the protocol and HTTP surface.
///
/// Protocol errors (duplicate, not-found) travel back to the originating
/// connection only; infrastructure failures abort the operation with no
/// partial state left behind.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A pending or accepted request already exists for the pair. Carries
    /// the existing request's id so the client can reconcile.
    #[error("A pending or accepted chat request already exists between these users")]
    DuplicateRequest { existing_id: Option<RequestId> },

    #[error("Chat request not found")]
    RequestNotFound,

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Failed to upload media: {0}")]
    MediaUploadFailed(String),

    #[error("Media not found: {0}")]
    MediaNotFound(Uuid),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::RequestNotFound,
            StoreError::DuplicatePair => ApiError::DuplicateRequest { existing_id: None },
            other => ApiError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<CryptoError> for ApiError {
    fn from(e: CryptoError) -> Self {
        ApiError::Internal(format!("crypto failure: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::DuplicateRequest { .. } => (StatusCode::CONFLICT, self.to_string()),
            ApiError::RequestNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::EmptyMessage => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::MediaUploadFailed(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            ApiError::MediaNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::StorageUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage unavailable".to_string())
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let mut body = serde_json::json!({
            "error": message,
        });

        // The duplicate conflict carries the surviving request id for
        // client-side reconciliation.
        if let ApiError::DuplicateRequest {
            existing_id: Some(id),
        } = &self
        {
            body["requestId"] = serde_json::json!(id);
        }

        (status, axum::Json(body)).into_response()
    }
}
