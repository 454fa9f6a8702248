//! PersistentVolumeClaim / PersistentVolume operations. A claim maps to an
//! engine-managed volume; PersistentVolumes are a read-only projection of
//! those volumes.

use crate::EngineAdapter;
use crate::convert::request::enrich_identity;
use crate::error::{Error, Result};
use crate::naming::{NAMESPACE_LABEL, PVC_NAME_LABEL, pvc_volume_name};

use std::collections::HashMap;

use bollard::models::VolumeCreateOptions;
use bollard::query_parameters::{ListVolumesOptions, RemoveVolumeOptions};
use k2d_store::{Kind, Selector};
use k8s_openapi::api::core::v1::{
    PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimStatus, PersistentVolumeSpec,
    PersistentVolumeStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::info;

impl EngineAdapter {
    pub async fn create_persistent_volume_claim(
        &self,
        mut claim: PersistentVolumeClaim,
    ) -> Result<()> {
        let name = claim
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::InvalidResource("persistentvolumeclaim has no name".to_string()))?;
        let namespace = claim
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| crate::naming::DEFAULT_NAMESPACE.to_string());
        enrich_identity(&mut claim.metadata);

        let bytes = serde_json::to_vec(&claim).map_err(|e| {
            Error::SerializationError(
                format!("failed to encode persistentvolumeclaim {namespace}/{name}"),
                e,
            )
        })?;
        self.store()
            .put(Kind::PersistentVolumeClaim, &namespace, &name, &bytes)
            .await?;

        let volume = pvc_volume_name(&namespace, &name);
        self.docker()
            .create_volume(VolumeCreateOptions {
                name: Some(volume.clone()),
                labels: Some(HashMap::from([
                    (PVC_NAME_LABEL.to_string(), name.clone()),
                    (NAMESPACE_LABEL.to_string(), namespace.clone()),
                ])),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::EngineError(format!("failed to create volume {volume}"), e))?;

        info!(msg = "persistent volume claim bound", namespace, name, volume);
        Ok(())
    }

    pub async fn get_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim> {
        let bytes = self
            .store()
            .get(Kind::PersistentVolumeClaim, namespace, name)
            .await?;
        let mut claim: PersistentVolumeClaim = serde_json::from_slice(&bytes).map_err(|e| {
            Error::SerializationError(
                format!("failed to decode persistentvolumeclaim {namespace}/{name}"),
                e,
            )
        })?;
        claim.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Bound".to_string()),
            ..Default::default()
        });
        if let Some(spec) = claim.spec.as_mut() {
            spec.volume_name = Some(pvc_volume_name(namespace, name));
        }
        Ok(claim)
    }

    pub async fn list_persistent_volume_claims(
        &self,
        namespace: Option<&str>,
        selector: Option<&Selector>,
    ) -> Result<Vec<PersistentVolumeClaim>> {
        let records = self
            .store()
            .list(Kind::PersistentVolumeClaim, namespace, selector)
            .await?;
        let mut claims = Vec::with_capacity(records.len());
        for record in records {
            let mut claim: PersistentVolumeClaim =
                serde_json::from_slice(&record).map_err(|e| {
                    Error::SerializationError(
                        "failed to decode persistentvolumeclaim record".to_string(),
                        e,
                    )
                })?;
            claim.status = Some(PersistentVolumeClaimStatus {
                phase: Some("Bound".to_string()),
                ..Default::default()
            });
            claims.push(claim);
        }
        Ok(claims)
    }

    pub async fn delete_persistent_volume_claim(&self, namespace: &str, name: &str) -> Result<()> {
        let volume = pvc_volume_name(namespace, name);
        match self
            .docker()
            .remove_volume(&volume, None::<RemoveVolumeOptions>)
            .await
        {
            Ok(()) => {}
            Err(e) => match Error::engine(format!("failed to remove volume {volume}"), e) {
                Error::NotFound => {}
                other => return Err(other),
            },
        }
        match self
            .store()
            .delete(Kind::PersistentVolumeClaim, namespace, name)
            .await
        {
            Ok(()) | Err(k2d_store::StoreError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Engine volumes backing claims, projected as PersistentVolumes.
    pub async fn list_persistent_volumes(&self) -> Result<Vec<PersistentVolume>> {
        let response = self
            .docker()
            .list_volumes(None::<ListVolumesOptions>)
            .await
            .map_err(|e| Error::EngineError("failed to list volumes".to_string(), e))?;

        let volumes = response.volumes.unwrap_or_default();
        Ok(volumes
            .into_iter()
            .filter(|volume| volume.labels.contains_key(PVC_NAME_LABEL))
            .map(|volume| {
                let claim = volume.labels.get(PVC_NAME_LABEL).cloned();
                let namespace = volume.labels.get(NAMESPACE_LABEL).cloned();
                PersistentVolume {
                    metadata: ObjectMeta {
                        name: Some(volume.name.clone()),
                        ..Default::default()
                    },
                    spec: Some(PersistentVolumeSpec {
                        storage_class_name: Some("local".to_string()),
                        claim_ref: claim.map(|claim_name| {
                            k8s_openapi::api::core::v1::ObjectReference {
                                kind: Some("PersistentVolumeClaim".to_string()),
                                name: Some(claim_name),
                                namespace,
                                ..Default::default()
                            }
                        }),
                        ..Default::default()
                    }),
                    status: Some(PersistentVolumeStatus {
                        phase: Some("Bound".to_string()),
                        ..Default::default()
                    }),
                }
            })
            .collect())
    }

    pub async fn get_persistent_volume(&self, name: &str) -> Result<PersistentVolume> {
        self.list_persistent_volumes()
            .await?
            .into_iter()
            .find(|volume| volume.metadata.name.as_deref() == Some(name))
            .ok_or(Error::NotFound)
    }
}
