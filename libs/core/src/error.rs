use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}: {1}")]
    IoError(String, #[source] std::io::Error),

    #[error("{0}: {1}")]
    SerializationError(String, #[source] serde_json::Error),

    #[error("failed to initialize telemetry: {0}")]
    TelemetryError(String),

    #[error("{0}")]
    InvalidConfiguration(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
