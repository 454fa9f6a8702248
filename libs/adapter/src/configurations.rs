//! ConfigMap and Secret operations. Both kinds live entirely in the
//! resource store; the engine only sees them projected into workload
//! containers as environment or bind mounts.

use crate::EngineAdapter;
use crate::error::{Error, Result};

use k2d_store::{Kind, Selector};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::info;

/// Name of the Secret holding the service account token issued at
/// bootstrap.
pub const SYSTEM_SECRET_NAME: &str = "k2d-serviceaccount";

impl EngineAdapter {
    pub async fn create_config_map(&self, config_map: ConfigMap) -> Result<ConfigMap> {
        let (namespace, name) = object_key(&config_map.metadata, "configmap")?;
        let bytes = serde_json::to_vec(&config_map).map_err(|e| {
            Error::SerializationError(format!("failed to encode configmap {namespace}/{name}"), e)
        })?;
        let written = self
            .store()
            .put(Kind::ConfigMap, &namespace, &name, &bytes)
            .await?;
        decode(&written, "configmap")
    }

    pub async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
        let bytes = self.store().get(Kind::ConfigMap, namespace, name).await?;
        decode(&bytes, "configmap")
    }

    pub async fn list_config_maps(
        &self,
        namespace: Option<&str>,
        selector: Option<&Selector>,
    ) -> Result<Vec<ConfigMap>> {
        let records = self
            .store()
            .list(Kind::ConfigMap, namespace, selector)
            .await?;
        records.iter().map(|r| decode(r, "configmap")).collect()
    }

    pub async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        Ok(self.store().delete(Kind::ConfigMap, namespace, name).await?)
    }

    pub async fn create_secret(&self, secret: Secret) -> Result<Secret> {
        let (namespace, name) = object_key(&secret.metadata, "secret")?;
        let bytes = serde_json::to_vec(&secret).map_err(|e| {
            Error::SerializationError(format!("failed to encode secret {namespace}/{name}"), e)
        })?;
        let written = self
            .store()
            .put(Kind::Secret, &namespace, &name, &bytes)
            .await?;
        decode(&written, "secret")
    }

    pub async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        let bytes = self.store().get(Kind::Secret, namespace, name).await?;
        decode(&bytes, "secret")
    }

    pub async fn list_secrets(
        &self,
        namespace: Option<&str>,
        selector: Option<&Selector>,
    ) -> Result<Vec<Secret>> {
        let records = self.store().list(Kind::Secret, namespace, selector).await?;
        records.iter().map(|r| decode(r, "secret")).collect()
    }

    pub async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        Ok(self.store().delete(Kind::Secret, namespace, name).await?)
    }

    /// Persist the service account Secret carrying the bearer token, once.
    pub async fn ensure_system_secret(&self, token: &str) -> Result<()> {
        let namespace = crate::naming::DEFAULT_NAMESPACE;
        match self.get_secret(namespace, SYSTEM_SECRET_NAME).await {
            Ok(_) => Ok(()),
            Err(Error::NotFound) => {
                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(SYSTEM_SECRET_NAME.to_string()),
                        namespace: Some(namespace.to_string()),
                        ..Default::default()
                    },
                    type_: Some("kubernetes.io/service-account-token".to_string()),
                    string_data: Some(
                        [("token".to_string(), token.to_string())]
                            .into_iter()
                            .collect(),
                    ),
                    ..Default::default()
                };
                self.create_secret(secret).await?;
                info!(msg = "system service account secret created");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn object_key(metadata: &ObjectMeta, what: &str) -> Result<(String, String)> {
    let name = metadata
        .name
        .clone()
        .ok_or_else(|| Error::InvalidResource(format!("{what} has no name")))?;
    let namespace = metadata
        .namespace
        .clone()
        .unwrap_or_else(|| crate::naming::DEFAULT_NAMESPACE.to_string());
    Ok((namespace, name))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::SerializationError(format!("failed to decode {what} record"), e))
}
