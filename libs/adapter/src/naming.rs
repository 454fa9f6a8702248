//! Identity mapping between Kubernetes objects and engine entities.
//!
//! A workload's container is named from its Kubernetes object name; the
//! namespace is carried as a container label and by attachment to the
//! namespace network. The engine enforces host-global container name
//! uniqueness, which subsumes per-namespace uniqueness.

pub const DEFAULT_NAMESPACE: &str = "default";

/// Namespace the object belongs to.
pub const NAMESPACE_LABEL: &str = "k2d.io/namespace";
/// Workload kind backing the container: Pod, Deployment or Job.
pub const WORKLOAD_KIND_LABEL: &str = "k2d.io/workload-kind";
/// Kubernetes object name backing the container.
pub const WORKLOAD_NAME_LABEL: &str = "k2d.io/workload-name";
/// Serialized Kubernetes object, used to re-hydrate reads.
pub const LAST_APPLIED_LABEL: &str = "k2d.io/last-applied-configuration";
/// Name of the Service whose port publications are applied to the container.
pub const SERVICE_LABEL: &str = "k2d.io/service";
/// PersistentVolumeClaim name backing an engine volume.
pub const PVC_NAME_LABEL: &str = "k2d.io/pvc-name";

const PVC_VOLUME_PREFIX: &str = "k2d-pvc";

/// Engine network backing a namespace. The `default` namespace maps onto the
/// network of the same name.
pub fn network_name(namespace: &str) -> &str {
    namespace
}

pub fn is_default_namespace(namespace: &str) -> bool {
    namespace == DEFAULT_NAMESPACE
}

/// Engine volume backing a PersistentVolumeClaim.
pub fn pvc_volume_name(namespace: &str, claim: &str) -> String {
    format!("{PVC_VOLUME_PREFIX}-{namespace}-{claim}")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pvc_volume_name() {
        assert_eq!(pvc_volume_name("default", "data"), "k2d-pvc-default-data");
    }

    #[test]
    fn test_default_namespace() {
        assert!(is_default_namespace("default"));
        assert!(!is_default_namespace("team"));
    }
}
