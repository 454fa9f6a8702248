use crate::error::{Error, Result};
use crate::naming::{LAST_APPLIED_LABEL, NAMESPACE_LABEL, WORKLOAD_KIND_LABEL};

use std::collections::HashMap;

use bollard::models::{ContainerInspectResponse, ContainerState};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus};
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::api::core::v1::{
    ContainerState as K8sContainerState, ContainerStateRunning, ContainerStateTerminated,
    ContainerStateWaiting, ContainerStatus, Pod, PodCondition, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

/// Normalized view of an inspected container, the input of every read-path
/// conversion.
#[derive(Clone, Debug, Default)]
pub struct ContainerSnapshot {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub state: Option<ContainerState>,
    pub restart_count: i64,
    pub image: String,
}

impl ContainerSnapshot {
    pub fn from_inspect(inspect: ContainerInspectResponse) -> Self {
        let labels = inspect
            .config
            .as_ref()
            .and_then(|config| config.labels.clone())
            .unwrap_or_default();
        let image = inspect
            .config
            .as_ref()
            .and_then(|config| config.image.clone())
            .unwrap_or_default();
        ContainerSnapshot {
            name: inspect
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            labels,
            state: inspect.state,
            restart_count: inspect.restart_count.unwrap_or_default(),
            image,
        }
    }

    pub fn namespace(&self) -> &str {
        self.labels
            .get(NAMESPACE_LABEL)
            .map(String::as_str)
            .unwrap_or(crate::naming::DEFAULT_NAMESPACE)
    }

    pub fn workload_kind(&self) -> Option<&str> {
        self.labels.get(WORKLOAD_KIND_LABEL).map(String::as_str)
    }

    pub fn is_running(&self) -> bool {
        self.state
            .as_ref()
            .and_then(|state| state.running)
            .unwrap_or(false)
    }

    fn exit_code(&self) -> Option<i64> {
        self.state.as_ref().and_then(|state| state.exit_code)
    }

    fn started_at(&self) -> Option<Time> {
        self.state
            .as_ref()
            .and_then(|state| state.started_at.as_deref())
            .and_then(parse_engine_time)
    }

    fn finished_at(&self) -> Option<Time> {
        self.state
            .as_ref()
            .and_then(|state| state.finished_at.as_deref())
            .and_then(parse_engine_time)
    }

    /// The original Kubernetes object, parsed back from the
    /// last-applied-configuration label.
    pub fn last_applied<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = self
            .labels
            .get(LAST_APPLIED_LABEL)
            .ok_or_else(|| {
                Error::InvalidResource(format!(
                    "container {} carries no source configuration",
                    self.name
                ))
            })?;
        serde_json::from_str(raw).map_err(|e| {
            Error::SerializationError(
                format!("failed to decode source configuration of {}", self.name),
                e,
            )
        })
    }
}

fn parse_engine_time(value: &str) -> Option<Time> {
    // the engine reports zero times for states never entered
    if value.is_empty() || value.starts_with("0001-01-01") {
        return None;
    }
    value
        .parse::<DateTime<Utc>>()
        .ok()
        .map(Time)
}

/// Pod phase derived from the engine container state.
pub fn pod_phase(snapshot: &ContainerSnapshot) -> &'static str {
    if snapshot.is_running() {
        return "Running";
    }
    match snapshot.exit_code() {
        Some(0) => "Succeeded",
        Some(_) => "Failed",
        None => "Pending",
    }
}

fn container_status(snapshot: &ContainerSnapshot) -> ContainerStatus {
    let running = snapshot.is_running();
    let state = if running {
        K8sContainerState {
            running: Some(ContainerStateRunning {
                started_at: snapshot.started_at(),
            }),
            ..Default::default()
        }
    } else if let Some(exit_code) = snapshot.exit_code() {
        K8sContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: exit_code as i32,
                finished_at: snapshot.finished_at(),
                started_at: snapshot.started_at(),
                ..Default::default()
            }),
            ..Default::default()
        }
    } else {
        K8sContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some("ContainerCreating".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    };

    ContainerStatus {
        name: snapshot.name.clone(),
        image: snapshot.image.clone(),
        ready: running,
        restart_count: snapshot.restart_count as i32,
        started: Some(running),
        state: Some(state),
        ..Default::default()
    }
}

/// Re-hydrate a Pod from the engine snapshot, deriving status at read time.
pub fn pod_from_snapshot(snapshot: &ContainerSnapshot) -> Result<Pod> {
    let mut pod: Pod = snapshot.last_applied()?;
    let phase = pod_phase(snapshot);
    let ready = snapshot.is_running();

    pod.status = Some(PodStatus {
        phase: Some(phase.to_string()),
        container_statuses: Some(vec![container_status(snapshot)]),
        conditions: Some(vec![PodCondition {
            type_: "Ready".to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
            last_transition_time: snapshot.started_at(),
            ..Default::default()
        }]),
        start_time: snapshot.started_at(),
        ..Default::default()
    });
    Ok(pod)
}

/// Re-hydrate a Deployment; replica counts collapse onto the single backing
/// container.
pub fn deployment_from_snapshot(snapshot: &ContainerSnapshot) -> Result<Deployment> {
    let mut deployment: Deployment = snapshot.last_applied()?;
    let ready = snapshot.is_running();
    let replicas = i32::from(ready);

    deployment.status = Some(DeploymentStatus {
        replicas: Some(1),
        ready_replicas: Some(replicas),
        available_replicas: Some(replicas),
        updated_replicas: Some(1),
        conditions: Some(vec![DeploymentCondition {
            type_: "Available".to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
            last_transition_time: snapshot.started_at(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    Ok(deployment)
}

/// Re-hydrate a Job; completion is derived from the container exit code.
pub fn job_from_snapshot(snapshot: &ContainerSnapshot) -> Result<Job> {
    let mut job: Job = snapshot.last_applied()?;
    let succeeded = snapshot.exit_code() == Some(0) && !snapshot.is_running();
    let failed = snapshot.exit_code().is_some_and(|code| code != 0);

    job.status = Some(JobStatus {
        active: Some(i32::from(snapshot.is_running())),
        succeeded: Some(i32::from(succeeded)),
        failed: Some(i32::from(failed)),
        start_time: snapshot.started_at(),
        completion_time: if succeeded { snapshot.finished_at() } else { None },
        ..Default::default()
    });
    Ok(job)
}

#[cfg(test)]
mod test {
    use super::*;

    fn snapshot(running: bool, exit_code: Option<i64>) -> ContainerSnapshot {
        let pod = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {"containers": [{"name": "c", "image": "nginx:1.25"}]}
        });
        ContainerSnapshot {
            name: "web".to_string(),
            labels: HashMap::from([
                (NAMESPACE_LABEL.to_string(), "default".to_string()),
                (WORKLOAD_KIND_LABEL.to_string(), "Pod".to_string()),
                (LAST_APPLIED_LABEL.to_string(), pod.to_string()),
            ]),
            state: Some(ContainerState {
                running: Some(running),
                exit_code,
                started_at: Some("2023-07-01T10:00:00Z".to_string()),
                finished_at: Some("0001-01-01T00:00:00Z".to_string()),
                ..Default::default()
            }),
            restart_count: 2,
            image: "nginx:1.25".to_string(),
        }
    }

    #[test]
    fn test_pod_phase() {
        assert_eq!(pod_phase(&snapshot(true, None)), "Running");
        assert_eq!(pod_phase(&snapshot(false, Some(0))), "Succeeded");
        assert_eq!(pod_phase(&snapshot(false, Some(137))), "Failed");
        assert_eq!(pod_phase(&snapshot(false, None)), "Pending");
    }

    #[test]
    fn test_pod_from_snapshot() {
        let pod = pod_from_snapshot(&snapshot(true, None)).unwrap();
        assert_eq!(pod.metadata.name.as_deref(), Some("web"));

        let status = pod.status.unwrap();
        assert_eq!(status.phase.as_deref(), Some("Running"));
        let statuses = status.container_statuses.unwrap();
        assert_eq!(statuses[0].restart_count, 2);
        assert!(statuses[0].ready);
        assert!(status.start_time.is_some());
    }

    #[test]
    fn test_deployment_from_snapshot_not_ready() {
        let mut snap = snapshot(false, Some(1));
        let deployment = serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {"template": {"spec": {"containers": [{"name": "c", "image": "nginx:1.25"}]}}}
        });
        snap.labels
            .insert(LAST_APPLIED_LABEL.to_string(), deployment.to_string());

        let deployment = deployment_from_snapshot(&snap).unwrap();
        let status = deployment.status.unwrap();
        assert_eq!(status.ready_replicas, Some(0));
        assert_eq!(status.replicas, Some(1));
    }

    #[test]
    fn test_job_completion() {
        let mut snap = snapshot(false, Some(0));
        let job = serde_json::json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"name": "task", "namespace": "default"},
            "spec": {"template": {"spec": {"containers": [{"name": "c", "image": "alpine"}]}}}
        });
        snap.labels
            .insert(LAST_APPLIED_LABEL.to_string(), job.to_string());

        let job = job_from_snapshot(&snap).unwrap();
        let status = job.status.unwrap();
        assert_eq!(status.succeeded, Some(1));
        assert_eq!(status.failed, Some(0));
    }

    #[test]
    fn test_zero_time_is_dropped() {
        assert!(parse_engine_time("0001-01-01T00:00:00Z").is_none());
        assert!(parse_engine_time("").is_none());
        assert!(parse_engine_time("2023-07-01T10:00:00Z").is_some());
    }

    #[test]
    fn test_missing_source_configuration() {
        let snap = ContainerSnapshot {
            name: "stray".to_string(),
            ..Default::default()
        };
        assert!(snap.last_applied::<Pod>().is_err());
    }
}
