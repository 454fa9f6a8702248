//! One engine-managed volume per kind. Records are moved in and out through
//! ephemeral helper containers mounting the volume, using the engine's tar
//! archive endpoints. Access to a given volume is serialized.

use crate::error::{Result, StoreError};
use crate::selector::Selector;
use crate::{Kind, namespace_segment, record_creation, record_labels, stamp_identity};

use std::collections::HashMap;
use std::sync::Arc;

use bollard::Docker;
use bollard::models::{ContainerCreateBody, HostConfig, VolumeCreateOptions};
use bollard::query_parameters::{
    CreateImageOptionsBuilder, DownloadFromContainerOptionsBuilder, RemoveContainerOptionsBuilder,
    UploadToContainerOptionsBuilder,
};
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

const VOLUME_PREFIX: &str = "k2d-store";
const MOUNT_PATH: &str = "/data";
const MANAGED_LABEL: &str = "store.k2d.io/kind";

pub struct VolumeStore {
    docker: Docker,
    copy_image: String,
    locks: Mutex<HashMap<&'static str, Arc<tokio::sync::Mutex<()>>>>,
}

impl VolumeStore {
    pub fn new(docker: Docker, copy_image: impl Into<String>) -> Self {
        VolumeStore {
            docker,
            copy_image: copy_image.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create the per-kind volumes. Volume creation is idempotent on the
    /// engine side.
    pub async fn ensure_volumes(&self) -> Result<()> {
        for kind in Kind::ALL {
            self.docker
                .create_volume(VolumeCreateOptions {
                    name: Some(volume_name(kind)),
                    labels: Some(HashMap::from([(
                        MANAGED_LABEL.to_string(),
                        kind.segment().to_string(),
                    )])),
                    ..Default::default()
                })
                .await
                .map_err(|e| {
                    StoreError::EngineError(format!("failed to create volume for {kind}"), e)
                })?;
        }
        Ok(())
    }

    fn volume_lock(&self, kind: Kind) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(kind.segment()).or_default().clone()
    }

    pub async fn put(&self, kind: Kind, namespace: &str, name: &str, data: &[u8]) -> Result<Vec<u8>> {
        let lock = self.volume_lock(kind);
        let _guard = lock.lock().await;

        let existing = match self.read_record(kind, namespace, name).await {
            Ok(bytes) => Some(bytes),
            Err(StoreError::NotFound) => None,
            Err(e) => return Err(e),
        };

        let mut value: Value = serde_json::from_slice(data).map_err(|e| {
            StoreError::SerializationError(format!("failed to decode {kind} payload"), e)
        })?;
        stamp_identity(&mut value, existing.as_deref())?;
        let stamped = serde_json::to_vec(&value).map_err(|e| {
            StoreError::SerializationError(format!("failed to encode {kind} record"), e)
        })?;

        let archive = build_archive(namespace, name, &stamped)?;
        let helper = self.create_helper(kind).await?;
        let upload = self
            .docker
            .upload_to_container(
                &helper,
                Some(UploadToContainerOptionsBuilder::default().path(MOUNT_PATH).build()),
                bollard::body_full(Bytes::from(archive)),
            )
            .await;
        self.remove_helper(&helper).await;
        upload.map_err(|e| {
            StoreError::EngineError(format!("failed to upload {kind} record to volume"), e)
        })?;

        debug!(msg = "stored record in volume", kind = %kind, namespace, name);
        Ok(stamped)
    }

    pub async fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Vec<u8>> {
        let lock = self.volume_lock(kind);
        let _guard = lock.lock().await;
        self.read_record(kind, namespace, name).await
    }

    pub async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        selector: Option<&Selector>,
    ) -> Result<Vec<Vec<u8>>> {
        let lock = self.volume_lock(kind);
        let _guard = lock.lock().await;

        let archive = match self.download(kind, MOUNT_PATH).await {
            Ok(archive) => archive,
            Err(StoreError::NotFound) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut records = Vec::new();
        let mut entries = tar::Archive::new(archive.as_slice());
        for entry in entries
            .entries()
            .map_err(|e| StoreError::IoError("failed to read volume archive".to_string(), e))?
        {
            let mut entry =
                entry.map_err(|e| StoreError::IoError("failed to read volume entry".to_string(), e))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry
                .path()
                .map_err(|e| StoreError::IoError("invalid path in volume archive".to_string(), e))?
                .into_owned();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let entry_namespace = path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            if namespace.is_some_and(|ns| namespace_segment(ns) != entry_namespace) {
                continue;
            }
            let mut data = Vec::new();
            std::io::Read::read_to_end(&mut entry, &mut data)
                .map_err(|e| StoreError::IoError("failed to read volume entry".to_string(), e))?;
            if selector.is_none_or(|s| s.matches(&record_labels(&data))) {
                records.push(data);
            }
        }

        records.sort_by_key(|data| record_creation(data));
        Ok(records)
    }

    pub async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> Result<()> {
        let lock = self.volume_lock(kind);
        let _guard = lock.lock().await;

        // existence check so absence surfaces as the typed sentinel
        self.read_record(kind, namespace, name).await?;

        let path = record_path(namespace, name);
        let helper = self
            .create_helper_with_cmd(kind, Some(vec!["rm".to_string(), "-f".to_string(), path]))
            .await?;
        let outcome = self.run_to_completion(&helper).await;
        self.remove_helper(&helper).await;
        outcome?;

        debug!(msg = "deleted record from volume", kind = %kind, namespace, name);
        Ok(())
    }

    async fn read_record(&self, kind: Kind, namespace: &str, name: &str) -> Result<Vec<u8>> {
        let archive = self.download(kind, &record_path(namespace, name)).await?;
        let mut entries = tar::Archive::new(archive.as_slice());
        let entry = entries
            .entries()
            .map_err(|e| StoreError::IoError("failed to read volume archive".to_string(), e))?
            .next()
            .ok_or(StoreError::NotFound)?;
        let mut entry =
            entry.map_err(|e| StoreError::IoError("failed to read volume entry".to_string(), e))?;
        let mut data = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut data)
            .map_err(|e| StoreError::IoError("failed to read volume entry".to_string(), e))?;
        Ok(data)
    }

    /// Download `path` from a helper container as a tar archive.
    async fn download(&self, kind: Kind, path: &str) -> Result<Vec<u8>> {
        let helper = self.create_helper(kind).await?;
        let mut stream = self.docker.download_from_container(
            &helper,
            Some(DownloadFromContainerOptionsBuilder::default().path(path).build()),
        );

        let mut archive = Vec::new();
        let mut failure: Option<bollard::errors::Error> = None;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => archive.extend_from_slice(&bytes),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        drop(stream);
        self.remove_helper(&helper).await;

        match failure {
            None => Ok(archive),
            Some(e) if is_engine_not_found(&e) => Err(StoreError::NotFound),
            Some(e) => Err(StoreError::EngineError(
                format!("failed to download {path} from {kind} volume"),
                e,
            )),
        }
    }

    async fn create_helper(&self, kind: Kind) -> Result<String> {
        self.create_helper_with_cmd(kind, None).await
    }

    async fn create_helper_with_cmd(&self, kind: Kind, cmd: Option<Vec<String>>) -> Result<String> {
        let body = ContainerCreateBody {
            image: Some(self.copy_image.clone()),
            cmd: cmd.clone(),
            labels: Some(HashMap::from([(
                MANAGED_LABEL.to_string(),
                kind.segment().to_string(),
            )])),
            host_config: Some(HostConfig {
                binds: Some(vec![format!("{}:{MOUNT_PATH}", volume_name(kind))]),
                ..Default::default()
            }),
            ..Default::default()
        };

        match self
            .docker
            .create_container(None::<bollard::query_parameters::CreateContainerOptions>, body.clone())
            .await
        {
            Ok(response) => Ok(response.id),
            Err(e) if is_engine_not_found(&e) => {
                self.pull_copy_image().await?;
                self.docker
                    .create_container(None::<bollard::query_parameters::CreateContainerOptions>, body)
                    .await
                    .map(|response| response.id)
                    .map_err(|e| {
                        StoreError::EngineError("failed to create helper container".to_string(), e)
                    })
            }
            Err(e) => Err(StoreError::EngineError(
                "failed to create helper container".to_string(),
                e,
            )),
        }
    }

    async fn pull_copy_image(&self) -> Result<()> {
        debug!(msg = "pulling store copy image", image = %self.copy_image);
        let mut stream = self.docker.create_image(
            Some(
                CreateImageOptionsBuilder::default()
                    .from_image(&self.copy_image)
                    .build(),
            ),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| {
                StoreError::EngineError(format!("failed to pull {}", self.copy_image), e)
            })?;
        }
        Ok(())
    }

    async fn run_to_completion(&self, container: &str) -> Result<()> {
        self.docker
            .start_container(container, None::<bollard::query_parameters::StartContainerOptions>)
            .await
            .map_err(|e| {
                StoreError::EngineError("failed to start helper container".to_string(), e)
            })?;
        let mut wait = self
            .docker
            .wait_container(container, None::<bollard::query_parameters::WaitContainerOptions>);
        while let Some(status) = wait.next().await {
            status.map_err(|e| {
                StoreError::EngineError("helper container failed".to_string(), e)
            })?;
        }
        Ok(())
    }

    async fn remove_helper(&self, container: &str) {
        if let Err(e) = self
            .docker
            .remove_container(
                container,
                Some(RemoveContainerOptionsBuilder::default().force(true).build()),
            )
            .await
        {
            tracing::warn!(msg = "failed to remove helper container", container, error = %e);
        }
    }
}

fn volume_name(kind: Kind) -> String {
    format!("{VOLUME_PREFIX}-{}", kind.segment())
}

fn record_path(namespace: &str, name: &str) -> String {
    format!("{MOUNT_PATH}/{}/{name}.json", namespace_segment(namespace))
}

fn is_engine_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn build_archive(namespace: &str, name: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o600);
    header.set_cksum();
    builder
        .append_data(
            &mut header,
            format!("{}/{name}.json", namespace_segment(namespace)),
            data,
        )
        .map_err(|e| StoreError::IoError("failed to build volume archive".to_string(), e))?;
    builder
        .into_inner()
        .map_err(|e| StoreError::IoError("failed to finish volume archive".to_string(), e))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_record_path_layout() {
        assert_eq!(record_path("default", "cfg"), "/data/default/cfg.json");
        assert_eq!(record_path("", "team"), "/data/_/team.json");
    }

    #[test]
    fn test_archive_roundtrip() {
        let archive = build_archive("default", "cfg", b"{\"a\":1}").unwrap();
        let mut entries = tar::Archive::new(archive.as_slice());
        let mut entry = entries.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(
            entry.path().unwrap().to_str().unwrap(),
            "default/cfg.json"
        );
        let mut data = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut data).unwrap();
        assert_eq!(data, b"{\"a\":1}");
    }
}
