//! Workload lifecycle: one engine container per Pod, Deployment or Job.

use crate::EngineAdapter;
use crate::convert::hydrate::{
    ContainerSnapshot, deployment_from_snapshot, job_from_snapshot, pod_from_snapshot,
};
use crate::convert::request::{
    CreateRequest, WorkloadDefinition, WorkloadKind, build_create_request, definition_from_deployment,
    definition_from_job, definition_from_pod,
};
use crate::error::{Error, Result};
use crate::naming::{NAMESPACE_LABEL, WORKLOAD_KIND_LABEL};

use std::collections::HashMap;

use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, ListContainersOptionsBuilder,
    RemoveContainerOptionsBuilder, StartContainerOptions,
};
use futures::StreamExt;
use k2d_store::Selector;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, info};

impl EngineAdapter {
    pub async fn create_pod(&self, mut pod: Pod) -> Result<()> {
        let definition = definition_from_pod(&mut pod)?;
        self.create_workload(definition).await
    }

    pub async fn create_deployment(&self, mut deployment: Deployment) -> Result<()> {
        let definition = definition_from_deployment(&mut deployment)?;
        self.create_workload(definition).await
    }

    pub async fn create_job(&self, mut job: Job) -> Result<()> {
        let definition = definition_from_job(&mut job)?;
        self.create_workload(definition).await
    }

    pub async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let snapshot = self
            .workload_snapshot(WorkloadKind::Pod, namespace, name)
            .await?;
        pod_from_snapshot(&snapshot)
    }

    pub async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        let snapshot = self
            .workload_snapshot(WorkloadKind::Deployment, namespace, name)
            .await?;
        deployment_from_snapshot(&snapshot)
    }

    pub async fn get_job(&self, namespace: &str, name: &str) -> Result<Job> {
        let snapshot = self
            .workload_snapshot(WorkloadKind::Job, namespace, name)
            .await?;
        job_from_snapshot(&snapshot)
    }

    pub async fn list_pods(
        &self,
        namespace: Option<&str>,
        selector: Option<&Selector>,
    ) -> Result<Vec<Pod>> {
        let snapshots = self
            .workload_snapshots(WorkloadKind::Pod, namespace, selector)
            .await?;
        snapshots.iter().map(pod_from_snapshot).collect()
    }

    pub async fn list_deployments(
        &self,
        namespace: Option<&str>,
        selector: Option<&Selector>,
    ) -> Result<Vec<Deployment>> {
        let snapshots = self
            .workload_snapshots(WorkloadKind::Deployment, namespace, selector)
            .await?;
        snapshots.iter().map(deployment_from_snapshot).collect()
    }

    pub async fn list_jobs(
        &self,
        namespace: Option<&str>,
        selector: Option<&Selector>,
    ) -> Result<Vec<Job>> {
        let snapshots = self
            .workload_snapshots(WorkloadKind::Job, namespace, selector)
            .await?;
        snapshots.iter().map(job_from_snapshot).collect()
    }

    /// Deleting an absent workload is not an error; the API reports success
    /// regardless of prior existence.
    pub async fn delete_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<()> {
        match self.workload_snapshot(kind, namespace, name).await {
            Ok(snapshot) => self.remove_container(&snapshot.name).await,
            Err(Error::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn create_workload(&self, definition: WorkloadDefinition) -> Result<()> {
        let service = self.pending_service_for(&definition).await?;
        let request = build_create_request(
            &definition,
            self.store(),
            &self.data_path,
            service.as_ref(),
        )
        .await?;

        // idempotent overwrite: a container with the same name is replaced
        match self.inspect_snapshot(&request.name).await {
            Ok(_) => self.remove_container(&request.name).await?,
            Err(Error::NotFound) => {}
            Err(e) => return Err(e),
        }

        self.create_and_start(&request).await?;
        info!(
            msg = "workload container started",
            kind = definition.kind.as_str(),
            namespace = definition.namespace,
            name = request.name,
        );
        Ok(())
    }

    pub(crate) async fn create_and_start(&self, request: &CreateRequest) -> Result<()> {
        let options = CreateContainerOptionsBuilder::default()
            .name(&request.name)
            .build();

        if let Err(e) = self
            .docker()
            .create_container(Some(options.clone()), request.body.clone())
            .await
        {
            if !is_missing_image(&e) {
                return Err(Error::EngineError(
                    format!("failed to create container {}", request.name),
                    e,
                ));
            }
            self.pull_image(&request.image).await?;
            self.docker()
                .create_container(Some(options), request.body.clone())
                .await
                .map_err(|e| {
                    Error::EngineError(format!("failed to create container {}", request.name), e)
                })?;
        }

        self.docker()
            .start_container(&request.name, None::<StartContainerOptions>)
            .await
            .map_err(|e| {
                Error::EngineError(format!("failed to start container {}", request.name), e)
            })
    }

    pub(crate) async fn pull_image(&self, image: &str) -> Result<()> {
        debug!(msg = "pulling image", image);
        let mut stream = self.docker().create_image(
            Some(CreateImageOptionsBuilder::default().from_image(image).build()),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| Error::EngineError(format!("failed to pull {image}"), e))?;
        }
        Ok(())
    }

    pub(crate) async fn remove_container(&self, name: &str) -> Result<()> {
        match self
            .docker()
            .remove_container(
                name,
                Some(RemoveContainerOptionsBuilder::default().force(true).build()),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => match Error::engine(format!("failed to remove container {name}"), e) {
                Error::NotFound => Ok(()),
                other => Err(other),
            },
        }
    }

    /// Inspect a container by name, whatever its workload kind.
    pub(crate) async fn inspect_snapshot(&self, name: &str) -> Result<ContainerSnapshot> {
        let inspect = self
            .docker()
            .inspect_container(
                name,
                None::<bollard::query_parameters::InspectContainerOptions>,
            )
            .await
            .map_err(|e| Error::engine(format!("failed to inspect container {name}"), e))?;
        Ok(ContainerSnapshot::from_inspect(inspect))
    }

    pub(crate) async fn workload_snapshot(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<ContainerSnapshot> {
        let snapshot = self.inspect_snapshot(name).await?;
        if snapshot.workload_kind() != Some(kind.as_str()) || snapshot.namespace() != namespace {
            return Err(Error::NotFound);
        }
        Ok(snapshot)
    }

    pub(crate) async fn workload_snapshots(
        &self,
        kind: WorkloadKind,
        namespace: Option<&str>,
        selector: Option<&Selector>,
    ) -> Result<Vec<ContainerSnapshot>> {
        let mut label_filters = vec![format!("{WORKLOAD_KIND_LABEL}={}", kind.as_str())];
        if let Some(namespace) = namespace {
            label_filters.push(format!("{NAMESPACE_LABEL}={namespace}"));
        }
        let filters = HashMap::from([("label".to_string(), label_filters)]);

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

        let mut snapshots = Vec::new();
        for container in containers {
            let Some(name) = container
                .names
                .and_then(|names| names.first().cloned())
                .map(|name| name.trim_start_matches('/').to_string())
            else {
                continue;
            };
            match self.inspect_snapshot(&name).await {
                Ok(snapshot) => {
                    if selector.is_none_or(|s| {
                        let labels = snapshot
                            .labels
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect();
                        s.matches(&labels)
                    }) {
                        snapshots.push(snapshot);
                    }
                }
                // removed between list and inspect
                Err(Error::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(snapshots)
    }
}

fn is_missing_image(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}
