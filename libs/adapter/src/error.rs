use k2d_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("resource not found")]
    NotFound,

    /// The default namespace and its network are reserved.
    #[error("the default namespace cannot be deleted")]
    ReservedNamespace,

    #[error("{0}: {1}")]
    EngineError(String, #[source] bollard::errors::Error),

    #[error("{0}")]
    Store(#[source] StoreError),

    #[error("{0}: {1}")]
    SerializationError(String, #[source] serde_json::Error),

    #[error("{0}: {1}")]
    IoError(String, #[source] std::io::Error),

    #[error("{0}")]
    InvalidResource(String),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Error::NotFound,
            other => Error::Store(other),
        }
    }
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    pub(crate) fn engine(context: impl Into<String>, err: bollard::errors::Error) -> Self {
        if matches!(
            err,
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                ..
            }
        ) {
            Error::NotFound
        } else {
            Error::EngineError(context.into(), err)
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
