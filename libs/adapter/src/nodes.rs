//! The single synthetic Node representing the host, built from the engine
//! system snapshot at read time.

use crate::EngineAdapter;
use crate::error::{Error, Result};

use k2d_core::version::KUBERNETES_VERSION;
use k8s_openapi::api::core::v1::{
    Node, NodeAddress, NodeCondition, NodeStatus, NodeSystemInfo,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

pub const NODE_NAME: &str = "k2d";

impl EngineAdapter {
    pub async fn get_node(&self, name: &str) -> Result<Node> {
        if name != NODE_NAME {
            return Err(Error::NotFound);
        }
        self.node().await
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(vec![self.node().await?])
    }

    async fn node(&self) -> Result<Node> {
        let info = self
            .docker()
            .info()
            .await
            .map_err(|e| Error::EngineError("failed to read engine info".to_string(), e))?;
        let version = self
            .docker()
            .version()
            .await
            .map_err(|e| Error::EngineError("failed to read engine version".to_string(), e))?;

        let cpu = info.ncpu.unwrap_or_default();
        let memory_ki = info.mem_total.unwrap_or_default() / 1024;
        let engine_version = version.version.clone().unwrap_or_default();

        Ok(Node {
            metadata: ObjectMeta {
                name: Some(NODE_NAME.to_string()),
                creation_timestamp: Some(Time(self.started_at)),
                ..Default::default()
            },
            status: Some(NodeStatus {
                addresses: Some(vec![NodeAddress {
                    type_: "InternalIP".to_string(),
                    address: self.advertised_address.clone(),
                }]),
                capacity: Some(
                    [
                        ("cpu".to_string(), Quantity(cpu.to_string())),
                        ("memory".to_string(), Quantity(format!("{memory_ki}Ki"))),
                    ]
                    .into_iter()
                    .collect(),
                ),
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    reason: Some("KubeletReady".to_string()),
                    message: Some("container engine is responding".to_string()),
                    last_heartbeat_time: Some(Time(k8s_openapi::chrono::Utc::now())),
                    ..Default::default()
                }]),
                node_info: Some(NodeSystemInfo {
                    architecture: info.architecture.clone().unwrap_or_default(),
                    operating_system: info.os_type.clone().unwrap_or_default(),
                    os_image: info.operating_system.clone().unwrap_or_default(),
                    kernel_version: info.kernel_version.clone().unwrap_or_default(),
                    container_runtime_version: format!("docker://{engine_version}"),
                    kubelet_version: format!("v{KUBERNETES_VERSION}-k2d"),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}
