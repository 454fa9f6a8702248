use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolumeClaim, Pod, Secret, Service,
};

pub const DEFAULT_NAMESPACE: &str = "default";

/// Execution priority of a queued operation. Dependencies (namespaces,
/// mounted configuration, volumes) must exist before the workloads that
/// reference them, and Services bind to workloads that must already exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OperationPriority {
    High,
    Medium,
    Low,
}

/// The Kubernetes object carried by an operation.
#[derive(Clone, Debug)]
pub enum OperationPayload {
    Namespace(Namespace),
    Pod(Pod),
    Deployment(Deployment),
    Job(Job),
    Service(Service),
    ConfigMap(ConfigMap),
    Secret(Secret),
    PersistentVolumeClaim(PersistentVolumeClaim),
}

impl OperationPayload {
    pub fn priority(&self) -> OperationPriority {
        match self {
            OperationPayload::Namespace(_)
            | OperationPayload::ConfigMap(_)
            | OperationPayload::Secret(_)
            | OperationPayload::PersistentVolumeClaim(_) => OperationPriority::High,
            OperationPayload::Pod(_) | OperationPayload::Deployment(_)
            | OperationPayload::Job(_) => OperationPriority::Medium,
            OperationPayload::Service(_) => OperationPriority::Low,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OperationPayload::Namespace(_) => "Namespace",
            OperationPayload::Pod(_) => "Pod",
            OperationPayload::Deployment(_) => "Deployment",
            OperationPayload::Job(_) => "Job",
            OperationPayload::Service(_) => "Service",
            OperationPayload::ConfigMap(_) => "ConfigMap",
            OperationPayload::Secret(_) => "Secret",
            OperationPayload::PersistentVolumeClaim(_) => "PersistentVolumeClaim",
        }
    }

    pub fn name(&self) -> String {
        let meta = match self {
            OperationPayload::Namespace(o) => &o.metadata,
            OperationPayload::Pod(o) => &o.metadata,
            OperationPayload::Deployment(o) => &o.metadata,
            OperationPayload::Job(o) => &o.metadata,
            OperationPayload::Service(o) => &o.metadata,
            OperationPayload::ConfigMap(o) => &o.metadata,
            OperationPayload::Secret(o) => &o.metadata,
            OperationPayload::PersistentVolumeClaim(o) => &o.metadata,
        };
        meta.name.clone().unwrap_or_default()
    }

    pub fn namespace(&self) -> String {
        let meta = match self {
            OperationPayload::Namespace(o) => &o.metadata,
            OperationPayload::Pod(o) => &o.metadata,
            OperationPayload::Deployment(o) => &o.metadata,
            OperationPayload::Job(o) => &o.metadata,
            OperationPayload::Service(o) => &o.metadata,
            OperationPayload::ConfigMap(o) => &o.metadata,
            OperationPayload::Secret(o) => &o.metadata,
            OperationPayload::PersistentVolumeClaim(o) => &o.metadata,
        };
        meta.namespace
            .clone()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }
}

/// A queued intent to mutate state, produced by an API handler and consumed
/// by the operation controller.
#[derive(Clone, Debug)]
pub struct Operation {
    pub priority: OperationPriority,
    pub payload: OperationPayload,
    pub request_id: String,
}

impl Operation {
    pub fn new(payload: OperationPayload, request_id: impl Into<String>) -> Self {
        Operation {
            priority: payload.priority(),
            payload,
            request_id: request_id.into(),
        }
    }
}

/// A flushed snapshot of pending operations, partitioned by priority.
/// Consumed once, High then Medium then Low, arrival order preserved within
/// a level.
#[derive(Debug, Default)]
pub struct OperationBatch {
    pub high: Vec<Operation>,
    pub medium: Vec<Operation>,
    pub low: Vec<Operation>,
}

impl OperationBatch {
    pub fn partition(operations: Vec<Operation>) -> Self {
        let mut batch = OperationBatch::default();
        for operation in operations {
            match operation.priority {
                OperationPriority::High => batch.high.push(operation),
                OperationPriority::Medium => batch.medium.push(operation),
                OperationPriority::Low => batch.low.push(operation),
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_ordered(self) -> impl Iterator<Item = Operation> {
        self.high
            .into_iter()
            .chain(self.medium)
            .chain(self.low)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn named_pod(name: &str) -> OperationPayload {
        OperationPayload::Pod(Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        })
    }

    fn named_config_map(name: &str) -> OperationPayload {
        OperationPayload::ConfigMap(ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        })
    }

    fn named_service(name: &str) -> OperationPayload {
        OperationPayload::Service(Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Service::default()
        })
    }

    #[test]
    fn test_priority_by_kind() {
        assert_eq!(named_config_map("c").priority(), OperationPriority::High);
        assert_eq!(named_pod("p").priority(), OperationPriority::Medium);
        assert_eq!(named_service("s").priority(), OperationPriority::Low);
    }

    #[test]
    fn test_default_namespace() {
        assert_eq!(named_pod("p").namespace(), "default");
    }

    #[test]
    fn test_partition_preserves_arrival_order() {
        let operations = vec![
            Operation::new(named_service("s1"), "r1"),
            Operation::new(named_pod("p1"), "r2"),
            Operation::new(named_config_map("c1"), "r3"),
            Operation::new(named_pod("p2"), "r4"),
            Operation::new(named_config_map("c2"), "r5"),
        ];

        let batch = OperationBatch::partition(operations);
        assert_eq!(batch.len(), 5);

        let ordered: Vec<String> = batch
            .into_ordered()
            .map(|op| op.payload.name())
            .collect();
        assert_eq!(ordered, ["c1", "c2", "p1", "p2", "s1"]);
    }
}
