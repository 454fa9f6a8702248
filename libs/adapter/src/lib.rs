pub mod configurations;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod logs;
pub mod naming;
pub mod namespaces;
pub mod nodes;
pub mod services;
pub mod volumes;
pub mod workloads;

pub use dispatch::OperationExecutor;
pub use error::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bollard::{API_DEFAULT_VERSION, Docker};
use chrono::{DateTime, Utc};
use k2d_store::StoreBackend;

pub const DEFAULT_SOCKET: &str = "unix:///var/run/docker.sock";

/// Stateful gateway translating Kubernetes reads and writes into container
/// engine operations on a single host. The engine client is internally
/// thread safe; the adapter is shared behind an [`Arc`].
pub struct EngineAdapter {
    pub(crate) docker: Docker,
    pub(crate) store: Arc<StoreBackend>,
    pub(crate) data_path: PathBuf,
    pub(crate) advertised_address: String,
    pub(crate) started_at: DateTime<Utc>,
}

impl EngineAdapter {
    pub fn new(
        docker: Docker,
        store: Arc<StoreBackend>,
        data_path: impl Into<PathBuf>,
        advertised_address: impl Into<String>,
    ) -> Self {
        EngineAdapter {
            docker,
            store,
            data_path: data_path.into(),
            advertised_address: advertised_address.into(),
            started_at: Utc::now(),
        }
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    pub fn store(&self) -> &StoreBackend {
        &self.store
    }

    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| Error::EngineError("failed to ping container engine".to_string(), e))?;
        Ok(())
    }
}

/// Connect to the local engine socket with the configured client timeout.
pub fn connect(timeout: Duration) -> Result<Docker> {
    Docker::connect_with_socket(DEFAULT_SOCKET, timeout.as_secs(), API_DEFAULT_VERSION)
        .map_err(|e| Error::EngineError("failed to connect to container engine".to_string(), e))
}
