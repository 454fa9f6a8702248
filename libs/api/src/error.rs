use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use k2d_store::StoreError;

/// HTTP-facing error taxonomy. Bodies stay deliberately plain: a bare 404
/// for missing resources (namespace validation produces its own
/// Kubernetes-shaped Status), wrapped text for the rest.
#[derive(Debug)]
pub enum ApiError {
    NotFound,
    BadRequest(String),
    Unauthorized,
    Internal(String),
}

impl ApiError {
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        ApiError::Internal(format!("{context}: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, format!("{message}\n")).into_response()
            }
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "invalid secret\n").into_response()
            }
            ApiError::Internal(message) => {
                tracing::error!(msg = "request failed", error = %message);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{message}\n")).into_response()
            }
        }
    }
}

impl From<k2d_adapter::Error> for ApiError {
    fn from(err: k2d_adapter::Error) -> Self {
        match err {
            k2d_adapter::Error::NotFound => ApiError::NotFound,
            k2d_adapter::Error::ReservedNamespace => ApiError::BadRequest(err.to_string()),
            k2d_adapter::Error::InvalidResource(message) => ApiError::BadRequest(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::InvalidSelector(message) => {
                ApiError::BadRequest(format!("invalid label selector: {message}"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;
