//! Bridges the operation controller to the adapter: each payload variant
//! dispatches onto the matching create path.

use crate::EngineAdapter;
use crate::error::Error;

use std::sync::Arc;

use k2d_core::controller::OperationDispatcher;
use k2d_core::operation::{Operation, OperationPayload};
use tracing::debug;

#[derive(Clone)]
pub struct OperationExecutor {
    adapter: Arc<EngineAdapter>,
}

impl OperationExecutor {
    pub fn new(adapter: Arc<EngineAdapter>) -> Self {
        OperationExecutor { adapter }
    }
}

impl OperationDispatcher for OperationExecutor {
    type Error = Error;

    async fn dispatch(&self, operation: Operation) -> Result<(), Error> {
        debug!(
            msg = "executing operation",
            request_id = operation.request_id,
            kind = operation.payload.kind(),
            namespace = operation.payload.namespace(),
            name = operation.payload.name(),
        );
        match operation.payload {
            OperationPayload::Namespace(namespace) => {
                self.adapter.create_namespace(namespace).await
            }
            OperationPayload::Pod(pod) => self.adapter.create_pod(pod).await,
            OperationPayload::Deployment(deployment) => {
                self.adapter.create_deployment(deployment).await
            }
            OperationPayload::Job(job) => self.adapter.create_job(job).await,
            OperationPayload::Service(service) => self.adapter.create_service(service).await,
            OperationPayload::ConfigMap(config_map) => {
                self.adapter.create_config_map(config_map).await.map(|_| ())
            }
            OperationPayload::Secret(secret) => {
                self.adapter.create_secret(secret).await.map(|_| ())
            }
            OperationPayload::PersistentVolumeClaim(claim) => {
                self.adapter.create_persistent_volume_claim(claim).await
            }
        }
    }
}
