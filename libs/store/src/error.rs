use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Typed sentinel, distinct from transient failures so callers can map
    /// it to an HTTP 404.
    #[error("resource not found")]
    NotFound,

    #[error("{0}: {1}")]
    IoError(String, #[source] std::io::Error),

    #[error("{0}: {1}")]
    SerializationError(String, #[source] serde_json::Error),

    #[error("{0}: {1}")]
    EngineError(String, #[source] bollard::errors::Error),

    #[error("invalid label selector: {0}")]
    InvalidSelector(String),

    #[error("{0}")]
    InvalidPayload(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
