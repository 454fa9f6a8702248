use crate::error::{Error, Result};
use crate::naming::{
    LAST_APPLIED_LABEL, NAMESPACE_LABEL, SERVICE_LABEL, WORKLOAD_KIND_LABEL, WORKLOAD_NAME_LABEL,
    pvc_volume_name,
};

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use bollard::models::{
    ContainerCreateBody, EndpointSettings, HostConfig, NetworkingConfig, PortBinding,
    RestartPolicy, RestartPolicyNameEnum,
};
use k2d_store::{Kind, StoreBackend};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Container, Pod, PodSpec, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::chrono::Utc;
use serde::Serialize;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadKind {
    Pod,
    Deployment,
    Job,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Pod => "Pod",
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::Job => "Job",
        }
    }

    pub fn parse(value: &str) -> Option<WorkloadKind> {
        match value {
            "Pod" => Some(WorkloadKind::Pod),
            "Deployment" => Some(WorkloadKind::Deployment),
            "Job" => Some(WorkloadKind::Job),
            _ => None,
        }
    }
}

/// The common shape of the workload kinds: identity plus the pod spec the
/// container is built from.
#[derive(Clone, Debug)]
pub struct WorkloadDefinition {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub pod_spec: PodSpec,
    /// The enriched source object, serialized. Stored as a container label
    /// so reads can re-hydrate the Kubernetes form.
    pub last_applied: String,
}

/// Assign uid, creation timestamp and an initial resource version when the
/// client left them out.
pub fn enrich_identity(metadata: &mut ObjectMeta) {
    if metadata.uid.is_none() {
        metadata.uid = Some(uuid::Uuid::new_v4().to_string());
    }
    if metadata.creation_timestamp.is_none() {
        metadata.creation_timestamp = Some(Time(Utc::now()));
    }
    if metadata.resource_version.is_none() {
        metadata.resource_version = Some("1".to_string());
    }
}

pub fn definition_from_pod(pod: &mut Pod) -> Result<WorkloadDefinition> {
    enrich_identity(&mut pod.metadata);
    let pod_spec = pod
        .spec
        .clone()
        .ok_or_else(|| Error::InvalidResource("pod has no spec".to_string()))?;
    definition(WorkloadKind::Pod, &pod.metadata, pod_spec, pod)
}

pub fn definition_from_deployment(deployment: &mut Deployment) -> Result<WorkloadDefinition> {
    enrich_identity(&mut deployment.metadata);
    let pod_spec = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.clone())
        .ok_or_else(|| Error::InvalidResource("deployment has no pod template spec".to_string()))?;
    definition(WorkloadKind::Deployment, &deployment.metadata, pod_spec, deployment)
}

pub fn definition_from_job(job: &mut Job) -> Result<WorkloadDefinition> {
    enrich_identity(&mut job.metadata);
    let pod_spec = job
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.clone())
        .ok_or_else(|| Error::InvalidResource("job has no pod template spec".to_string()))?;
    definition(WorkloadKind::Job, &job.metadata, pod_spec, job)
}

fn definition<T: Serialize>(
    kind: WorkloadKind,
    metadata: &ObjectMeta,
    pod_spec: PodSpec,
    object: &T,
) -> Result<WorkloadDefinition> {
    let name = metadata
        .name
        .clone()
        .ok_or_else(|| Error::InvalidResource(format!("{} has no name", kind.as_str())))?;
    let namespace = metadata
        .namespace
        .clone()
        .unwrap_or_else(|| crate::naming::DEFAULT_NAMESPACE.to_string());
    let last_applied = serde_json::to_string(object).map_err(|e| {
        Error::SerializationError(format!("failed to encode {}", kind.as_str()), e)
    })?;
    Ok(WorkloadDefinition {
        kind,
        name,
        namespace,
        labels: metadata.labels.clone().unwrap_or_default(),
        pod_spec,
        last_applied,
    })
}

/// An engine container create request derived from a workload definition.
pub struct CreateRequest {
    pub name: String,
    pub image: String,
    pub body: ContainerCreateBody,
}

/// Convert a workload into an engine create request.
///
/// Environment and file projections of ConfigMaps and Secrets are resolved
/// against the store; ConfigMap/Secret volumes are materialized as files
/// under the data path and bind mounted.
pub async fn build_create_request(
    definition: &WorkloadDefinition,
    store: &StoreBackend,
    data_path: &Path,
    service: Option<&Service>,
) -> Result<CreateRequest> {
    let container = definition
        .pod_spec
        .containers
        .first()
        .ok_or_else(|| Error::InvalidResource("workload has no containers".to_string()))?;
    let image = container
        .image
        .clone()
        .ok_or_else(|| Error::InvalidResource("workload container has no image".to_string()))?;

    let env = resolve_env(container, store, &definition.namespace).await?;
    let binds = resolve_binds(
        container,
        &definition.pod_spec,
        store,
        data_path,
        &definition.namespace,
    )
    .await?;

    let mut labels: HashMap<String, String> = definition
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    labels.insert(NAMESPACE_LABEL.to_string(), definition.namespace.clone());
    labels.insert(
        WORKLOAD_KIND_LABEL.to_string(),
        definition.kind.as_str().to_string(),
    );
    labels.insert(WORKLOAD_NAME_LABEL.to_string(), definition.name.clone());
    labels.insert(
        LAST_APPLIED_LABEL.to_string(),
        definition.last_applied.clone(),
    );

    let (exposed_ports, port_bindings) = match service {
        Some(service) => {
            let service_name = service.metadata.name.clone().unwrap_or_default();
            labels.insert(SERVICE_LABEL.to_string(), service_name);
            let (exposed, bindings) = service_port_publications(service);
            (Some(exposed), Some(bindings))
        }
        None => (None, None),
    };

    let host_config = HostConfig {
        binds: if binds.is_empty() { None } else { Some(binds) },
        port_bindings,
        restart_policy: Some(restart_policy(definition.kind, &definition.pod_spec)),
        ..Default::default()
    };

    let networking_config = NetworkingConfig {
        endpoints_config: Some(HashMap::from([(
            crate::naming::network_name(&definition.namespace).to_string(),
            EndpointSettings::default(),
        )])),
    };

    let body = ContainerCreateBody {
        image: Some(image.clone()),
        env: if env.is_empty() { None } else { Some(env) },
        entrypoint: container.command.clone(),
        cmd: container.args.clone(),
        working_dir: container.working_dir.clone(),
        labels: Some(labels),
        exposed_ports,
        host_config: Some(host_config),
        networking_config: Some(networking_config),
        ..Default::default()
    };

    Ok(CreateRequest {
        name: definition.name.clone(),
        image,
        body,
    })
}

/// Port publications of a Service: container port exposures and host
/// bindings, one per service port. The published host port is the service
/// port; the container side is the target port when set.
pub fn service_port_publications(
    service: &Service,
) -> (
    HashMap<String, HashMap<(), ()>>,
    HashMap<String, Option<Vec<PortBinding>>>,
) {
    let mut exposed = HashMap::new();
    let mut bindings = HashMap::new();

    let ports = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.clone())
        .unwrap_or_default();

    for port in ports {
        let container_port = match &port.target_port {
            Some(IntOrString::Int(value)) => *value,
            // named target ports cannot be resolved without the workload,
            // fall back to the service port
            Some(IntOrString::String(_)) | None => port.port,
        };
        let protocol = port
            .protocol
            .clone()
            .unwrap_or_else(|| "TCP".to_string())
            .to_lowercase();
        let key = format!("{container_port}/{protocol}");
        exposed.insert(key.clone(), HashMap::new());
        bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(port.port.to_string()),
            }]),
        );
    }

    (exposed, bindings)
}

fn restart_policy(kind: WorkloadKind, pod_spec: &PodSpec) -> RestartPolicy {
    let name = match kind {
        WorkloadKind::Deployment => RestartPolicyNameEnum::ALWAYS,
        WorkloadKind::Job => RestartPolicyNameEnum::ON_FAILURE,
        WorkloadKind::Pod => match pod_spec.restart_policy.as_deref() {
            Some("Never") => RestartPolicyNameEnum::NO,
            Some("OnFailure") => RestartPolicyNameEnum::ON_FAILURE,
            _ => RestartPolicyNameEnum::ALWAYS,
        },
    };
    RestartPolicy {
        name: Some(name),
        maximum_retry_count: None,
    }
}

async fn resolve_env(
    container: &Container,
    store: &StoreBackend,
    namespace: &str,
) -> Result<Vec<String>> {
    let mut env = Vec::new();

    for source in container.env_from.clone().unwrap_or_default() {
        let prefix = source.prefix.clone().unwrap_or_default();
        if let Some(reference) = &source.config_map_ref {
            let name = reference.name.clone();
            match fetch_config_map(store, namespace, &name).await {
                Ok(config_map) => {
                    for (key, value) in config_map.data.clone().unwrap_or_default() {
                        env.push(format!("{prefix}{key}={value}"));
                    }
                }
                Err(Error::NotFound) if reference.optional == Some(true) => {}
                Err(e) => return Err(e),
            }
        }
        if let Some(reference) = &source.secret_ref {
            let name = reference.name.clone();
            match fetch_secret(store, namespace, &name).await {
                Ok(secret) => {
                    for (key, value) in secret_values(&secret) {
                        env.push(format!("{prefix}{key}={value}"));
                    }
                }
                Err(Error::NotFound) if reference.optional == Some(true) => {}
                Err(e) => return Err(e),
            }
        }
    }

    for variable in container.env.clone().unwrap_or_default() {
        if let Some(value) = variable.value {
            env.push(format!("{}={}", variable.name, value));
            continue;
        }
        let Some(source) = variable.value_from else {
            continue;
        };
        if let Some(reference) = source.config_map_key_ref {
            match fetch_config_map(store, namespace, &reference.name).await {
                Ok(config_map) => {
                    if let Some(value) = config_map
                        .data
                        .as_ref()
                        .and_then(|data| data.get(&reference.key))
                    {
                        env.push(format!("{}={}", variable.name, value));
                    } else if reference.optional != Some(true) {
                        return Err(Error::InvalidResource(format!(
                            "key {} not found in configmap {}/{}",
                            reference.key, namespace, reference.name
                        )));
                    }
                }
                Err(Error::NotFound) if reference.optional == Some(true) => {}
                Err(e) => return Err(e),
            }
        } else if let Some(reference) = source.secret_key_ref {
            match fetch_secret(store, namespace, &reference.name).await {
                Ok(secret) => {
                    if let Some(value) = secret_values(&secret).remove(&reference.key) {
                        env.push(format!("{}={}", variable.name, value));
                    } else if reference.optional != Some(true) {
                        return Err(Error::InvalidResource(format!(
                            "key {} not found in secret {}/{}",
                            reference.key, namespace, reference.name
                        )));
                    }
                }
                Err(Error::NotFound) if reference.optional == Some(true) => {}
                Err(e) => return Err(e),
            }
        }
    }

    Ok(env)
}

async fn resolve_binds(
    container: &Container,
    pod_spec: &PodSpec,
    store: &StoreBackend,
    data_path: &Path,
    namespace: &str,
) -> Result<Vec<String>> {
    let volumes = pod_spec.volumes.clone().unwrap_or_default();
    let mut binds = Vec::new();

    for mount in container.volume_mounts.clone().unwrap_or_default() {
        let Some(volume) = volumes.iter().find(|v| v.name == mount.name) else {
            warn!(msg = "volume mount references unknown volume", volume = %mount.name);
            continue;
        };
        let read_only = if mount.read_only == Some(true) { ":ro" } else { "" };

        if let Some(source) = &volume.config_map {
            let name = source.name.clone();
            let config_map = fetch_config_map(store, namespace, &name).await?;
            let dir = materialize_files(
                data_path,
                namespace,
                "configmaps",
                &name,
                config_map.data.clone().unwrap_or_default(),
            )
            .await?;
            binds.push(format!("{}:{}{read_only}", dir.display(), mount.mount_path));
        } else if let Some(source) = &volume.secret {
            let name = source.secret_name.clone().ok_or_else(|| {
                Error::InvalidResource(format!("secret volume {} has no secretName", volume.name))
            })?;
            let secret = fetch_secret(store, namespace, &name).await?;
            let dir = materialize_files(
                data_path,
                namespace,
                "secrets",
                &name,
                secret_values(&secret),
            )
            .await?;
            binds.push(format!("{}:{}{read_only}", dir.display(), mount.mount_path));
        } else if let Some(source) = &volume.persistent_volume_claim {
            binds.push(format!(
                "{}:{}{read_only}",
                pvc_volume_name(namespace, &source.claim_name),
                mount.mount_path
            ));
        } else if let Some(source) = &volume.host_path {
            binds.push(format!("{}:{}{read_only}", source.path, mount.mount_path));
        } else {
            warn!(msg = "unsupported volume source", volume = %volume.name);
        }
    }

    Ok(binds)
}

/// Write projection files under
/// `<data-path>/resources/<namespace>/<kind>/<name>/` and return the
/// directory to bind mount.
async fn materialize_files(
    data_path: &Path,
    namespace: &str,
    kind_segment: &str,
    name: &str,
    entries: BTreeMap<String, String>,
) -> Result<PathBuf> {
    let dir = data_path
        .join("resources")
        .join(namespace)
        .join(kind_segment)
        .join(name);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| Error::IoError(format!("failed to create {dir:?}"), e))?;
    for (key, value) in entries {
        let path = dir.join(&key);
        tokio::fs::write(&path, value)
            .await
            .map_err(|e| Error::IoError(format!("failed to write {path:?}"), e))?;
    }
    Ok(dir)
}

async fn fetch_config_map(
    store: &StoreBackend,
    namespace: &str,
    name: &str,
) -> Result<ConfigMap> {
    let bytes = store.get(Kind::ConfigMap, namespace, name).await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        Error::SerializationError(format!("failed to decode configmap {namespace}/{name}"), e)
    })
}

async fn fetch_secret(store: &StoreBackend, namespace: &str, name: &str) -> Result<Secret> {
    let bytes = store.get(Kind::Secret, namespace, name).await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        Error::SerializationError(format!("failed to decode secret {namespace}/{name}"), e)
    })
}

/// Secret entries as plain strings. `stringData` wins over the encoded
/// `data` form for duplicated keys.
pub fn secret_values(secret: &Secret) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for (key, bytes) in secret.data.clone().unwrap_or_default() {
        if let Ok(value) = String::from_utf8(bytes.0) {
            values.insert(key, value);
        }
    }
    for (key, value) in secret.string_data.clone().unwrap_or_default() {
        values.insert(key, value);
    }
    values
}

#[cfg(test)]
mod test {
    use super::*;
    use k2d_store::DiskStore;

    fn pod(name: &str, image: &str) -> Pod {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name, "namespace": "default", "labels": {"app": name}},
            "spec": {"containers": [{"name": "c", "image": image}]}
        }))
        .unwrap()
    }

    fn service(name: &str, port: i32, target: i32) -> Service {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": name, "namespace": "default"},
            "spec": {
                "selector": {"app": "web"},
                "ports": [{"port": port, "targetPort": target}]
            }
        }))
        .unwrap()
    }

    fn disk_store() -> (tempfile::TempDir, StoreBackend) {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreBackend::Disk(DiskStore::new(dir.path().join("store")));
        (dir, store)
    }

    #[test]
    fn test_enrich_identity_assigns_missing_fields() {
        let mut metadata = ObjectMeta::default();
        enrich_identity(&mut metadata);
        assert!(metadata.uid.is_some());
        assert!(metadata.creation_timestamp.is_some());
        assert_eq!(metadata.resource_version.as_deref(), Some("1"));

        let uid = metadata.uid.clone();
        enrich_identity(&mut metadata);
        assert_eq!(metadata.uid, uid);
    }

    #[test]
    fn test_definition_requires_spec() {
        let mut pod = Pod {
            metadata: ObjectMeta {
                name: Some("p".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(definition_from_pod(&mut pod).is_err());
    }

    #[tokio::test]
    async fn test_build_create_request_basics() {
        let (_dir, store) = disk_store();
        let mut pod = pod("nginx", "nginx:1.25");
        let definition = definition_from_pod(&mut pod).unwrap();

        let request = build_create_request(&definition, &store, Path::new("/tmp"), None)
            .await
            .unwrap();

        assert_eq!(request.name, "nginx");
        assert_eq!(request.image, "nginx:1.25");

        let labels = request.body.labels.as_ref().unwrap();
        assert_eq!(labels.get(NAMESPACE_LABEL).unwrap(), "default");
        assert_eq!(labels.get(WORKLOAD_KIND_LABEL).unwrap(), "Pod");
        assert_eq!(labels.get("app").unwrap(), "nginx");
        assert!(labels.contains_key(LAST_APPLIED_LABEL));

        let networking = request.body.networking_config.as_ref().unwrap();
        assert!(
            networking
                .endpoints_config
                .as_ref()
                .unwrap()
                .contains_key("default")
        );
    }

    #[tokio::test]
    async fn test_build_create_request_with_service_ports() {
        let (_dir, store) = disk_store();
        let mut pod = pod("web", "nginx:1.25");
        let definition = definition_from_pod(&mut pod).unwrap();
        let service = service("web-svc", 8080, 80);

        let request = build_create_request(&definition, &store, Path::new("/tmp"), Some(&service))
            .await
            .unwrap();

        let exposed = request.body.exposed_ports.as_ref().unwrap();
        assert!(exposed.contains_key("80/tcp"));

        let bindings = request
            .body
            .host_config
            .as_ref()
            .unwrap()
            .port_bindings
            .as_ref()
            .unwrap();
        let binding = bindings.get("80/tcp").unwrap().as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("8080"));

        let labels = request.body.labels.as_ref().unwrap();
        assert_eq!(labels.get(SERVICE_LABEL).unwrap(), "web-svc");
    }

    #[tokio::test]
    async fn test_env_resolution_from_store() {
        let (_dir, store) = disk_store();
        store
            .put(
                Kind::ConfigMap,
                "default",
                "cfg",
                serde_json::json!({
                    "apiVersion": "v1",
                    "kind": "ConfigMap",
                    "metadata": {"name": "cfg", "namespace": "default"},
                    "data": {"MODE": "fast"}
                })
                .to_string()
                .as_bytes(),
            )
            .await
            .unwrap();

        let mut pod: Pod = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "p", "namespace": "default"},
            "spec": {"containers": [{
                "name": "c",
                "image": "alpine:latest",
                "env": [
                    {"name": "STATIC", "value": "1"},
                    {"name": "MODE", "valueFrom": {"configMapKeyRef": {"name": "cfg", "key": "MODE"}}}
                ]
            }]}
        }))
        .unwrap();
        let definition = definition_from_pod(&mut pod).unwrap();

        let request = build_create_request(&definition, &store, Path::new("/tmp"), None)
            .await
            .unwrap();
        let env = request.body.env.as_ref().unwrap();
        assert!(env.contains(&"STATIC=1".to_string()));
        assert!(env.contains(&"MODE=fast".to_string()));
    }

    #[test]
    fn test_restart_policies() {
        let spec = PodSpec::default();
        assert_eq!(
            restart_policy(WorkloadKind::Deployment, &spec).name,
            Some(RestartPolicyNameEnum::ALWAYS)
        );
        assert_eq!(
            restart_policy(WorkloadKind::Job, &spec).name,
            Some(RestartPolicyNameEnum::ON_FAILURE)
        );

        let never = PodSpec {
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        };
        assert_eq!(
            restart_policy(WorkloadKind::Pod, &never).name,
            Some(RestartPolicyNameEnum::NO)
        );
    }

    #[test]
    fn test_secret_values_decoding() {
        let secret: Secret = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": "s", "namespace": "default"},
            "data": {"password": "aHVudGVyMg=="},
            "stringData": {"user": "admin"}
        }))
        .unwrap();

        let values = secret_values(&secret);
        assert_eq!(values.get("password").map(String::as_str), Some("hunter2"));
        assert_eq!(values.get("user").map(String::as_str), Some("admin"));
    }
}
