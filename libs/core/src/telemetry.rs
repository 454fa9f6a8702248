use crate::error::{Error, Result};

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

serde_plain::derive_display_from_serialize!(LogFormat);

/// Install the global tracing subscriber.
///
/// `filter` is an `EnvFilter` directive, e.g. "debug" or
/// "info,bollard=warn,k2d=debug".
pub fn init(filter: &str, format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_new(filter)
        .map_err(|e| Error::TelemetryError(format!("invalid log filter {filter:?}: {e}")))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    match format {
        LogFormat::Text => builder
            .try_init()
            .map_err(|e| Error::TelemetryError(e.to_string()))?,
        LogFormat::Json => builder
            .json()
            .try_init()
            .map_err(|e| Error::TelemetryError(e.to_string()))?,
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_log_format_display() {
        assert_eq!(LogFormat::Text.to_string(), "text");
        assert_eq!(LogFormat::Json.to_string(), "json");
    }
}
