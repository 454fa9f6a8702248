//! Service operations: a Service publishes ports on the container of the
//! workload its label selector targets. Port changes require re-creating
//! the container, and a Service created before its workload is stored until
//! the workload arrives.

use crate::EngineAdapter;
use crate::convert::hydrate::ContainerSnapshot;
use crate::convert::request::{
    WorkloadDefinition, WorkloadKind, definition_from_deployment, definition_from_job,
    definition_from_pod, enrich_identity,
};
use crate::error::{Error, Result};
use crate::naming::{NAMESPACE_LABEL, SERVICE_LABEL, WORKLOAD_KIND_LABEL};

use std::collections::{BTreeMap, HashMap};

use bollard::query_parameters::ListContainersOptionsBuilder;
use k2d_store::{Kind, Selector};
use k8s_openapi::api::core::v1::Service;
use tracing::{debug, info};

impl EngineAdapter {
    pub async fn create_service(&self, mut service: Service) -> Result<()> {
        let name = service
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::InvalidResource("service has no name".to_string()))?;
        let namespace = service
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| crate::naming::DEFAULT_NAMESPACE.to_string());
        enrich_identity(&mut service.metadata);

        let bytes = serde_json::to_vec(&service).map_err(|e| {
            Error::SerializationError(format!("failed to encode service {namespace}/{name}"), e)
        })?;
        self.store()
            .put(Kind::Service, &namespace, &name, &bytes)
            .await?;

        match self.service_target(&namespace, &service).await? {
            Some(snapshot) => {
                self.republish_workload(&snapshot, Some(&service)).await?;
                info!(msg = "service published", namespace, name);
            }
            None => {
                debug!(
                    msg = "service stored, no workload matches its selector yet",
                    namespace,
                    name
                );
            }
        }
        Ok(())
    }

    pub async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        let bytes = self.store().get(Kind::Service, namespace, name).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            Error::SerializationError(format!("failed to decode service {namespace}/{name}"), e)
        })
    }

    pub async fn list_services(
        &self,
        namespace: Option<&str>,
        selector: Option<&Selector>,
    ) -> Result<Vec<Service>> {
        let records = self.store().list(Kind::Service, namespace, selector).await?;
        records
            .iter()
            .map(|record| {
                serde_json::from_slice(record).map_err(|e| {
                    Error::SerializationError("failed to decode service record".to_string(), e)
                })
            })
            .collect()
    }

    /// Delete the Service record and strip its port publications from the
    /// workload container that carries them.
    pub async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        match self.store().delete(Kind::Service, namespace, name).await {
            Ok(()) | Err(k2d_store::StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let filters = HashMap::from([(
            "label".to_string(),
            vec![
                format!("{NAMESPACE_LABEL}={namespace}"),
                format!("{SERVICE_LABEL}={name}"),
            ],
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
            let Some(container_name) = container
                .names
                .and_then(|names| names.first().cloned())
                .map(|n| n.trim_start_matches('/').to_string())
            else {
                continue;
            };
            match self.inspect_snapshot(&container_name).await {
                Ok(snapshot) => self.republish_workload(&snapshot, None).await?,
                Err(Error::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        info!(msg = "service deleted", namespace, name);
        Ok(())
    }

    /// The stored Service whose selector targets the given workload, if any.
    /// Consulted at workload-create time to apply pending publications.
    pub(crate) async fn pending_service_for(
        &self,
        definition: &WorkloadDefinition,
    ) -> Result<Option<Service>> {
        let services = self.list_services(Some(&definition.namespace), None).await?;
        Ok(services.into_iter().find(|service| {
            service
                .spec
                .as_ref()
                .and_then(|spec| spec.selector.as_ref())
                .is_some_and(|selector| selector_targets(selector, &definition.labels))
        }))
    }

    /// The container of the workload selected by the Service, if it exists.
    async fn service_target(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Option<ContainerSnapshot>> {
        let Some(selector) = service
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.clone())
            .filter(|selector| !selector.is_empty())
        else {
            return Ok(None);
        };

        let filters = HashMap::from([(
            "label".to_string(),
            vec![
                format!("{NAMESPACE_LABEL}={namespace}"),
                WORKLOAD_KIND_LABEL.to_string(),
            ],
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
            let Some(container_name) = container
                .names
                .and_then(|names| names.first().cloned())
                .map(|n| n.trim_start_matches('/').to_string())
            else {
                continue;
            };
            match self.inspect_snapshot(&container_name).await {
                Ok(snapshot) => {
                    let labels: BTreeMap<String, String> = snapshot
                        .labels
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    if selector_targets(&selector, &labels) {
                        return Ok(Some(snapshot));
                    }
                }
                Err(Error::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Re-create a workload container from its stored configuration, with or
    /// without the port publications of a Service.
    pub(crate) async fn republish_workload(
        &self,
        snapshot: &ContainerSnapshot,
        service: Option<&Service>,
    ) -> Result<()> {
        let kind = snapshot
            .workload_kind()
            .and_then(WorkloadKind::parse)
            .ok_or_else(|| {
                Error::InvalidResource(format!(
                    "container {} is not a workload container",
                    snapshot.name
                ))
            })?;

        let definition = match kind {
            WorkloadKind::Pod => definition_from_pod(&mut snapshot.last_applied()?)?,
            WorkloadKind::Deployment => {
                definition_from_deployment(&mut snapshot.last_applied()?)?
            }
            WorkloadKind::Job => definition_from_job(&mut snapshot.last_applied()?)?,
        };

        let request = crate::convert::request::build_create_request(
            &definition,
            self.store(),
            &self.data_path,
            service,
        )
        .await?;

        self.remove_container(&snapshot.name).await?;
        self.create_and_start(&request).await
    }
}

/// A Service targets a workload when every selector entry is present in the
/// workload labels.
fn selector_targets(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    !selector.is_empty()
        && selector
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
}

#[cfg(test)]
mod test {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_selector_targets() {
        assert!(selector_targets(
            &map(&[("app", "web")]),
            &map(&[("app", "web"), ("tier", "front")])
        ));
        assert!(!selector_targets(
            &map(&[("app", "web"), ("tier", "back")]),
            &map(&[("app", "web"), ("tier", "front")])
        ));
        assert!(!selector_targets(&map(&[]), &map(&[("app", "web")])));
    }
}
