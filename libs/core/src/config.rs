use crate::telemetry::LogFormat;

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde_json::json;

/// Runtime configuration.
///
/// Every knob is both a CLI flag and a `K2D_*` environment variable so the
/// server can be driven from a plain `docker run -e ...` invocation.
#[derive(Parser, Debug, Clone)]
#[command(name = "k2d", about = "Kubernetes API translation for a single container engine host")]
pub struct Config {
    /// IPv4 address advertised in generated certificates and in the kubeconfig.
    /// Auto-detected from the host interfaces when unset.
    #[arg(long, env = "K2D_ADVERTISE_ADDR")]
    pub advertise_addr: Option<Ipv4Addr>,

    /// Root directory of persisted state (TLS material, token, resource store)
    #[arg(long, env = "K2D_DATA_PATH", default_value = "/var/lib/k2d")]
    pub data_path: PathBuf,

    /// Container engine client timeout, e.g. "30s", "10m", "1h"
    #[arg(long, env = "K2D_DOCKER_CLIENT_TIMEOUT", default_value = "10m", value_parser = parse_duration)]
    pub docker_client_timeout: Duration,

    /// Log output format
    #[arg(long, env = "K2D_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Logging filter directive for `tracing_subscriber::filter::EnvFilter`
    #[arg(long, env = "K2D_LOG_LEVEL", default_value = "debug")]
    pub log_level: String,

    /// Maximum number of queued operations before a batch is flushed early
    #[arg(long, env = "K2D_OPERATION_BATCH_MAX_SIZE", default_value_t = 25)]
    pub operation_batch_max_size: usize,

    /// HTTPS listen port
    #[arg(long, env = "K2D_PORT", default_value_t = 6443)]
    pub port: u16,

    /// Bearer token securing the API. Generated and persisted when unset.
    #[arg(long, env = "K2D_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Resource store backend
    #[arg(long, env = "K2D_STORE_BACKEND", value_enum, default_value_t = StoreBackendKind::Disk)]
    pub store_backend: StoreBackendKind,

    /// Image used by the volume store backend to copy data in and out of volumes
    #[arg(long, env = "K2D_STORE_VOLUME_COPY_IMAGE_NAME", default_value = "alpine:latest")]
    pub store_volume_copy_image_name: String,

    /// Portainer Edge key. Setting it together with the Edge ID deploys the
    /// Edge agent container at startup.
    #[arg(long, env = "PORTAINER_EDGE_KEY", hide_env_values = true)]
    pub edge_key: Option<String>,

    /// Portainer Edge identifier
    #[arg(long, env = "PORTAINER_EDGE_ID")]
    pub edge_id: Option<String>,

    /// Portainer agent image tag used for the Edge agent deployment
    #[arg(long, env = "PORTAINER_AGENT_VERSION", default_value = "2.19.0")]
    pub edge_agent_version: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendKind {
    Disk,
    Volume,
}

serde_plain::derive_display_from_serialize!(StoreBackendKind);

impl Config {
    /// Configuration as reported by the diagnostics endpoint. Secrets are
    /// masked, never echoed.
    pub fn redacted(&self) -> serde_json::Value {
        json!({
            "advertiseAddr": self.advertise_addr.map(|a| a.to_string()),
            "dataPath": self.data_path,
            "dockerClientTimeoutSeconds": self.docker_client_timeout.as_secs(),
            "logFormat": self.log_format,
            "logLevel": self.log_level,
            "operationBatchMaxSize": self.operation_batch_max_size,
            "port": self.port,
            "secret": self.secret.as_ref().map(|_| "********"),
            "storeBackend": self.store_backend,
            "storeVolumeCopyImageName": self.store_volume_copy_image_name,
            "edgeKey": self.edge_key.as_ref().map(|_| "********"),
            "edgeId": self.edge_id,
        })
    }
}

/// Parse durations of the form "90s", "10m", "2h" or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let count: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {value:?}"))?;
    let seconds = match unit {
        "s" => count,
        "m" => count * 60,
        "h" => count * 3600,
        _ => return Err(format!("invalid duration unit {unit:?}")),
    };
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("10m"), Ok(Duration::from_secs(600)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn test_redacted_masks_secret() {
        let config = Config::parse_from([
            "k2d",
            "--secret",
            "super-secret-token",
            "--edge-key",
            "edge-key-value",
        ]);
        let redacted = config.redacted();
        assert_eq!(redacted["secret"], "********");
        assert_eq!(redacted["edgeKey"], "********");
        assert_eq!(redacted["port"], 6443);
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["k2d"]);
        assert_eq!(config.port, 6443);
        assert_eq!(config.operation_batch_max_size, 25);
        assert_eq!(config.store_backend, StoreBackendKind::Disk);
        assert_eq!(config.docker_client_timeout, Duration::from_secs(600));
        assert_eq!(config.data_path, PathBuf::from("/var/lib/k2d"));
    }
}
