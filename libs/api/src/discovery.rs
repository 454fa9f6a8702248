//! Discovery documents: `/api`, `/api/v1`, `/apis`, `/apis/<group>`. The
//! resource registry below is the single source of truth for what the
//! server exposes; the OpenAPI builder derives its paths from it.

use crate::AppState;

use axum::Json;
use axum::extract::State;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    APIGroup, APIGroupList, APIResource, APIResourceList, APIVersions, GroupVersionForDiscovery,
    ServerAddressByClientCIDR,
};

/// A resource exposed by the server: discovery shape plus the verbs wired
/// into the router.
pub struct ResourceDescriptor {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
    pub verbs: &'static [&'static str],
    pub short_names: &'static [&'static str],
    /// Scaffolding for kinds that are wired but not served yet
    /// (StatefulSet, DaemonSet). Disabled resources are hidden from
    /// discovery and OpenAPI.
    pub enabled: bool,
}

impl ResourceDescriptor {
    pub fn group_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

pub fn registered_resources() -> &'static [ResourceDescriptor] {
    const RESOURCES: &[ResourceDescriptor] = &[
        ResourceDescriptor {
            group: "",
            version: "v1",
            kind: "Namespace",
            plural: "namespaces",
            namespaced: false,
            verbs: &["create", "delete", "get", "list"],
            short_names: &["ns"],
            enabled: true,
        },
        ResourceDescriptor {
            group: "",
            version: "v1",
            kind: "Node",
            plural: "nodes",
            namespaced: false,
            verbs: &["get", "list"],
            short_names: &["no"],
            enabled: true,
        },
        ResourceDescriptor {
            group: "",
            version: "v1",
            kind: "Pod",
            plural: "pods",
            namespaced: true,
            verbs: &["create", "delete", "get", "list", "patch"],
            short_names: &["po"],
            enabled: true,
        },
        ResourceDescriptor {
            group: "",
            version: "v1",
            kind: "Service",
            plural: "services",
            namespaced: true,
            verbs: &["create", "delete", "get", "list", "patch"],
            short_names: &["svc"],
            enabled: true,
        },
        ResourceDescriptor {
            group: "",
            version: "v1",
            kind: "ConfigMap",
            plural: "configmaps",
            namespaced: true,
            verbs: &["create", "delete", "get", "list", "patch"],
            short_names: &["cm"],
            enabled: true,
        },
        ResourceDescriptor {
            group: "",
            version: "v1",
            kind: "Secret",
            plural: "secrets",
            namespaced: true,
            verbs: &["create", "delete", "get", "list", "patch", "update"],
            short_names: &[],
            enabled: true,
        },
        ResourceDescriptor {
            group: "",
            version: "v1",
            kind: "Event",
            plural: "events",
            namespaced: true,
            verbs: &["list"],
            short_names: &["ev"],
            enabled: true,
        },
        ResourceDescriptor {
            group: "",
            version: "v1",
            kind: "PersistentVolume",
            plural: "persistentvolumes",
            namespaced: false,
            verbs: &["get", "list"],
            short_names: &["pv"],
            enabled: true,
        },
        ResourceDescriptor {
            group: "",
            version: "v1",
            kind: "PersistentVolumeClaim",
            plural: "persistentvolumeclaims",
            namespaced: true,
            verbs: &["create", "delete", "get", "list"],
            short_names: &["pvc"],
            enabled: true,
        },
        ResourceDescriptor {
            group: "apps",
            version: "v1",
            kind: "Deployment",
            plural: "deployments",
            namespaced: true,
            verbs: &["create", "delete", "get", "list", "patch"],
            short_names: &["deploy"],
            enabled: true,
        },
        ResourceDescriptor {
            group: "batch",
            version: "v1",
            kind: "Job",
            plural: "jobs",
            namespaced: true,
            verbs: &["create", "delete", "get", "list", "patch"],
            short_names: &[],
            enabled: true,
        },
        ResourceDescriptor {
            group: "apps",
            version: "v1",
            kind: "StatefulSet",
            plural: "statefulsets",
            namespaced: true,
            verbs: &["create", "delete", "get", "list", "patch"],
            short_names: &["sts"],
            enabled: false,
        },
        ResourceDescriptor {
            group: "apps",
            version: "v1",
            kind: "DaemonSet",
            plural: "daemonsets",
            namespaced: true,
            verbs: &["create", "delete", "get", "list", "patch"],
            short_names: &["ds"],
            enabled: false,
        },
    ];
    RESOURCES
}

/// Groups listed in discovery whose implementations are empty.
const EMPTY_GROUPS: &[&str] = &[
    "events.k8s.io",
    "authorization.k8s.io",
    "storage.k8s.io",
];

fn api_resource(descriptor: &ResourceDescriptor) -> APIResource {
    APIResource {
        name: descriptor.plural.to_string(),
        singular_name: descriptor.kind.to_lowercase(),
        kind: descriptor.kind.to_string(),
        namespaced: descriptor.namespaced,
        verbs: descriptor.verbs.iter().map(|v| v.to_string()).collect(),
        short_names: if descriptor.short_names.is_empty() {
            None
        } else {
            Some(descriptor.short_names.iter().map(|s| s.to_string()).collect())
        },
        ..Default::default()
    }
}

fn resource_list(group_version: &str) -> APIResourceList {
    APIResourceList {
        group_version: group_version.to_string(),
        resources: registered_resources()
            .iter()
            .filter(|descriptor| descriptor.enabled && descriptor.group_version() == group_version)
            .map(api_resource)
            .collect(),
    }
}

fn group(name: &str) -> APIGroup {
    let version = GroupVersionForDiscovery {
        group_version: format!("{name}/v1"),
        version: "v1".to_string(),
    };
    APIGroup {
        name: name.to_string(),
        versions: vec![version.clone()],
        preferred_version: Some(version),
        ..Default::default()
    }
}

pub async fn api_versions(State(state): State<AppState>) -> Json<APIVersions> {
    Json(APIVersions {
        versions: vec!["v1".to_string()],
        server_address_by_client_cidrs: vec![ServerAddressByClientCIDR {
            client_cidr: "0.0.0.0/0".to_string(),
            server_address: format!("{}:{}", state.advertised_address, state.port),
        }],
    })
}

pub async fn core_v1_resources() -> Json<APIResourceList> {
    Json(resource_list("v1"))
}

pub async fn api_groups() -> Json<APIGroupList> {
    let mut groups: Vec<APIGroup> = vec![group("apps"), group("batch")];
    groups.extend(EMPTY_GROUPS.iter().map(|name| group(name)));

    let metrics_version = GroupVersionForDiscovery {
        group_version: "metrics.k8s.io/v1beta1".to_string(),
        version: "v1beta1".to_string(),
    };
    groups.push(APIGroup {
        name: "metrics.k8s.io".to_string(),
        versions: vec![metrics_version.clone()],
        preferred_version: Some(metrics_version),
        ..Default::default()
    });

    Json(APIGroupList { groups })
}

pub async fn apps_group() -> Json<APIGroup> {
    Json(group("apps"))
}

pub async fn apps_v1_resources() -> Json<APIResourceList> {
    Json(resource_list("apps/v1"))
}

pub async fn batch_group() -> Json<APIGroup> {
    Json(group("batch"))
}

pub async fn batch_v1_resources() -> Json<APIResourceList> {
    Json(resource_list("batch/v1"))
}

pub async fn empty_group_resources(group_version: String) -> Json<APIResourceList> {
    Json(APIResourceList {
        group_version,
        resources: Vec::new(),
    })
}
