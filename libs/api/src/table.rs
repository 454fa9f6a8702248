//! `meta.k8s.io/v1` Table projections with per-kind columns, returned when
//! a client negotiates the Table media type on a list endpoint.

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Pod, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ListMeta, ObjectMeta, Time};
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub api_version: String,
    pub kind: String,
    pub metadata: ListMeta,
    pub column_definitions: Vec<TableColumnDefinition>,
    pub rows: Vec<TableRow>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub format: String,
    pub description: String,
    pub priority: i32,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub cells: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
}

impl Table {
    fn new(columns: &[(&str, &str)], rows: Vec<TableRow>) -> Self {
        Table {
            api_version: "meta.k8s.io/v1".to_string(),
            kind: "Table".to_string(),
            metadata: ListMeta::default(),
            column_definitions: columns
                .iter()
                .map(|(name, type_)| TableColumnDefinition {
                    name: name.to_string(),
                    type_: type_.to_string(),
                    format: if *name == "Name" { "name" } else { "" }.to_string(),
                    description: String::new(),
                    priority: 0,
                })
                .collect(),
            rows,
        }
    }
}

/// Compact age rendering, the way kubectl prints it.
pub fn format_age(timestamp: Option<&Time>) -> String {
    let Some(Time(created)) = timestamp else {
        return "<unknown>".to_string();
    };
    let elapsed = Utc::now().signed_duration_since(*created);
    let seconds = elapsed.num_seconds().max(0);
    match seconds {
        0..60 => format!("{seconds}s"),
        60..3600 => format!("{}m", seconds / 60),
        3600..86400 => format!("{}h", seconds / 3600),
        _ => format!("{}d", seconds / 86400),
    }
}

fn name_of(metadata: &ObjectMeta) -> Value {
    json!(metadata.name.clone().unwrap_or_default())
}

fn age_of(metadata: &ObjectMeta) -> Value {
    json!(format_age(metadata.creation_timestamp.as_ref()))
}

pub fn pods_table(pods: &[Pod]) -> Table {
    let rows = pods
        .iter()
        .map(|pod| {
            let statuses = pod
                .status
                .as_ref()
                .and_then(|status| status.container_statuses.as_ref());
            let total = statuses.map(Vec::len).unwrap_or_default();
            let ready = statuses
                .map(|statuses| statuses.iter().filter(|status| status.ready).count())
                .unwrap_or_default();
            let restarts: i32 = statuses
                .map(|statuses| statuses.iter().map(|status| status.restart_count).sum())
                .unwrap_or_default();
            let phase = pod
                .status
                .as_ref()
                .and_then(|status| status.phase.clone())
                .unwrap_or_else(|| "Unknown".to_string());
            TableRow {
                cells: vec![
                    name_of(&pod.metadata),
                    json!(format!("{ready}/{total}")),
                    json!(phase),
                    json!(restarts),
                    age_of(&pod.metadata),
                ],
                object: None,
            }
        })
        .collect();
    Table::new(
        &[
            ("Name", "string"),
            ("Ready", "string"),
            ("Status", "string"),
            ("Restarts", "integer"),
            ("Age", "string"),
        ],
        rows,
    )
}

pub fn deployments_table(deployments: &[Deployment]) -> Table {
    let rows = deployments
        .iter()
        .map(|deployment| {
            let status = deployment.status.as_ref();
            let replicas = status.and_then(|s| s.replicas).unwrap_or_default();
            let ready = status.and_then(|s| s.ready_replicas).unwrap_or_default();
            let updated = status.and_then(|s| s.updated_replicas).unwrap_or_default();
            let available = status.and_then(|s| s.available_replicas).unwrap_or_default();
            TableRow {
                cells: vec![
                    name_of(&deployment.metadata),
                    json!(format!("{ready}/{replicas}")),
                    json!(updated),
                    json!(available),
                    age_of(&deployment.metadata),
                ],
                object: None,
            }
        })
        .collect();
    Table::new(
        &[
            ("Name", "string"),
            ("Ready", "string"),
            ("Up-to-date", "integer"),
            ("Available", "integer"),
            ("Age", "string"),
        ],
        rows,
    )
}

pub fn jobs_table(jobs: &[Job]) -> Table {
    let rows = jobs
        .iter()
        .map(|job| {
            let succeeded = job
                .status
                .as_ref()
                .and_then(|status| status.succeeded)
                .unwrap_or_default();
            TableRow {
                cells: vec![
                    name_of(&job.metadata),
                    json!(format!("{succeeded}/1")),
                    age_of(&job.metadata),
                ],
                object: None,
            }
        })
        .collect();
    Table::new(
        &[
            ("Name", "string"),
            ("Completions", "string"),
            ("Age", "string"),
        ],
        rows,
    )
}

pub fn services_table(services: &[Service]) -> Table {
    let rows = services
        .iter()
        .map(|service| {
            let ports = service
                .spec
                .as_ref()
                .and_then(|spec| spec.ports.as_ref())
                .map(|ports| {
                    ports
                        .iter()
                        .map(|port| {
                            format!(
                                "{}/{}",
                                port.port,
                                port.protocol.clone().unwrap_or_else(|| "TCP".to_string())
                            )
                        })
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();
            let type_ = service
                .spec
                .as_ref()
                .and_then(|spec| spec.type_.clone())
                .unwrap_or_else(|| "ClusterIP".to_string());
            TableRow {
                cells: vec![
                    name_of(&service.metadata),
                    json!(type_),
                    json!(ports),
                    age_of(&service.metadata),
                ],
                object: None,
            }
        })
        .collect();
    Table::new(
        &[
            ("Name", "string"),
            ("Type", "string"),
            ("Ports", "string"),
            ("Age", "string"),
        ],
        rows,
    )
}

pub fn config_maps_table(config_maps: &[ConfigMap]) -> Table {
    let rows = config_maps
        .iter()
        .map(|config_map| {
            let data = config_map.data.as_ref().map(|d| d.len()).unwrap_or_default();
            TableRow {
                cells: vec![
                    name_of(&config_map.metadata),
                    json!(data),
                    age_of(&config_map.metadata),
                ],
                object: None,
            }
        })
        .collect();
    Table::new(
        &[("Name", "string"), ("Data", "integer"), ("Age", "string")],
        rows,
    )
}

pub fn secrets_table(secrets: &[Secret]) -> Table {
    let rows = secrets
        .iter()
        .map(|secret| {
            let data = secret.data.as_ref().map(|d| d.len()).unwrap_or_default();
            let type_ = secret
                .type_
                .clone()
                .unwrap_or_else(|| "Opaque".to_string());
            TableRow {
                cells: vec![
                    name_of(&secret.metadata),
                    json!(type_),
                    json!(data),
                    age_of(&secret.metadata),
                ],
                object: None,
            }
        })
        .collect();
    Table::new(
        &[
            ("Name", "string"),
            ("Type", "string"),
            ("Data", "integer"),
            ("Age", "string"),
        ],
        rows,
    )
}

pub fn namespaces_table(namespaces: &[Namespace]) -> Table {
    let rows = namespaces
        .iter()
        .map(|namespace| {
            let phase = namespace
                .status
                .as_ref()
                .and_then(|status| status.phase.clone())
                .unwrap_or_else(|| "Active".to_string());
            TableRow {
                cells: vec![
                    name_of(&namespace.metadata),
                    json!(phase),
                    age_of(&namespace.metadata),
                ],
                object: None,
            }
        })
        .collect();
    Table::new(
        &[("Name", "string"), ("Status", "string"), ("Age", "string")],
        rows,
    )
}

pub fn nodes_table(nodes: &[Node]) -> Table {
    let rows = nodes
        .iter()
        .map(|node| {
            let ready = node
                .status
                .as_ref()
                .and_then(|status| status.conditions.as_ref())
                .and_then(|conditions| {
                    conditions
                        .iter()
                        .find(|condition| condition.type_ == "Ready")
                })
                .map(|condition| {
                    if condition.status == "True" { "Ready" } else { "NotReady" }
                })
                .unwrap_or("Unknown");
            let version = node
                .status
                .as_ref()
                .and_then(|status| status.node_info.as_ref())
                .map(|info| info.kubelet_version.clone())
                .unwrap_or_default();
            TableRow {
                cells: vec![
                    name_of(&node.metadata),
                    json!(ready),
                    age_of(&node.metadata),
                    json!(version),
                ],
                object: None,
            }
        })
        .collect();
    Table::new(
        &[
            ("Name", "string"),
            ("Status", "string"),
            ("Age", "string"),
            ("Version", "string"),
        ],
        rows,
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(None), "<unknown>");
        let now = Utc::now();
        assert_eq!(format_age(Some(&Time(now - Duration::seconds(30)))), "30s");
        assert_eq!(format_age(Some(&Time(now - Duration::minutes(5)))), "5m");
        assert_eq!(format_age(Some(&Time(now - Duration::hours(7)))), "7h");
        assert_eq!(format_age(Some(&Time(now - Duration::days(3)))), "3d");
    }

    #[test]
    fn test_pods_table_shape() {
        let pod: Pod = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web"},
            "spec": {"containers": [{"name": "c", "image": "nginx"}]},
            "status": {
                "phase": "Running",
                "containerStatuses": [{
                    "name": "c", "image": "nginx", "imageID": "", "ready": true,
                    "restartCount": 3
                }]
            }
        }))
        .unwrap();

        let table = pods_table(&[pod]);
        assert_eq!(table.kind, "Table");
        assert_eq!(table.api_version, "meta.k8s.io/v1");
        assert_eq!(table.column_definitions.len(), 5);
        assert_eq!(table.rows[0].cells[0], "web");
        assert_eq!(table.rows[0].cells[1], "1/1");
        assert_eq!(table.rows[0].cells[2], "Running");
        assert_eq!(table.rows[0].cells[3], 3);
    }
}
