//! Namespace operations: a namespace maps to a user-defined bridge network
//! of the same name. `default` is reserved and always present.

use crate::EngineAdapter;
use crate::convert::request::enrich_identity;
use crate::error::{Error, Result};
use crate::naming::{DEFAULT_NAMESPACE, NAMESPACE_LABEL, is_default_namespace, network_name};

use std::collections::HashMap;

use bollard::models::NetworkCreateRequest;
use bollard::query_parameters::{
    InspectNetworkOptions, ListContainersOptionsBuilder,
};
use k2d_store::Kind;
use k8s_openapi::api::core::v1::{Namespace, NamespaceStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use tracing::info;

impl EngineAdapter {
    pub async fn create_namespace(&self, mut namespace: Namespace) -> Result<()> {
        let name = namespace
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::InvalidResource("namespace has no name".to_string()))?;
        enrich_identity(&mut namespace.metadata);

        let bytes = serde_json::to_vec(&namespace).map_err(|e| {
            Error::SerializationError(format!("failed to encode namespace {name}"), e)
        })?;
        self.store().put(Kind::Namespace, "", &name, &bytes).await?;

        if !is_default_namespace(&name) {
            self.ensure_network(&name).await?;
        }
        info!(msg = "namespace created", name);
        Ok(())
    }

    pub async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        match self.store().get(Kind::Namespace, "", name).await {
            Ok(bytes) => {
                let mut namespace: Namespace = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::SerializationError(format!("failed to decode namespace {name}"), e)
                })?;
                namespace.status = Some(NamespaceStatus {
                    phase: Some("Active".to_string()),
                    ..Default::default()
                });
                Ok(namespace)
            }
            Err(k2d_store::StoreError::NotFound) if is_default_namespace(name) => {
                Ok(self.default_namespace())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        let records = self.store().list(Kind::Namespace, None, None).await?;
        let mut namespaces = Vec::with_capacity(records.len() + 1);
        let mut has_default = false;
        for record in records {
            let mut namespace: Namespace = serde_json::from_slice(&record).map_err(|e| {
                Error::SerializationError("failed to decode namespace record".to_string(), e)
            })?;
            namespace.status = Some(NamespaceStatus {
                phase: Some("Active".to_string()),
                ..Default::default()
            });
            has_default |= namespace.metadata.name.as_deref() == Some(DEFAULT_NAMESPACE);
            namespaces.push(namespace);
        }
        if !has_default {
            namespaces.insert(0, self.default_namespace());
        }
        Ok(namespaces)
    }

    /// Deleting a namespace removes every workload container attached to its
    /// network, then the network itself. The default namespace is reserved.
    pub async fn delete_namespace(&self, name: &str) -> Result<()> {
        if is_default_namespace(name) {
            return Err(Error::ReservedNamespace);
        }

        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{NAMESPACE_LABEL}={name}")],
        )]);
        let containers = self
            .docker()
            .list_containers(Some(
                ListContainersOptionsBuilder::default()
                    .all(true)
                    .filters(&filters)
                    .build(),
            ))
            .await
            .map_err(|e| Error::EngineError("failed to list containers".to_string(), e))?;

        for container in containers {
            if let Some(container_name) = container
                .names
                .and_then(|names| names.first().cloned())
                .map(|n| n.trim_start_matches('/').to_string())
            {
                self.remove_container(&container_name).await?;
            }
        }

        match self.docker().remove_network(network_name(name)).await {
            Ok(()) => {}
            Err(e) => match Error::engine(format!("failed to remove network {name}"), e) {
                Error::NotFound => {}
                other => return Err(other),
            },
        }

        match self.store().delete(Kind::Namespace, "", name).await {
            Ok(()) | Err(k2d_store::StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        info!(msg = "namespace deleted", name);
        Ok(())
    }

    /// Create the backing network when it does not exist yet. Used for both
    /// namespace creation and the bootstrap provisioning of `default`.
    pub async fn ensure_network(&self, namespace: &str) -> Result<()> {
        let name = network_name(namespace);
        if self
            .docker()
            .inspect_network(name, None::<InspectNetworkOptions>)
            .await
            .is_ok()
        {
            return Ok(());
        }

        self.docker()
            .create_network(NetworkCreateRequest {
                name: name.to_string(),
                driver: Some("bridge".to_string()),
                labels: Some(HashMap::from([(
                    NAMESPACE_LABEL.to_string(),
                    namespace.to_string(),
                )])),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::EngineError(format!("failed to create network {name}"), e))?;
        info!(msg = "network created", name);
        Ok(())
    }

    fn default_namespace(&self) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(DEFAULT_NAMESPACE.to_string()),
                creation_timestamp: Some(Time(self.started_at)),
                ..Default::default()
            },
            status: Some(NamespaceStatus {
                phase: Some("Active".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
