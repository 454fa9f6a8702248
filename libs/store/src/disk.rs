//! One JSON file per record under `<root>/<kind>/<namespace>/<name>.json`.
//! Writes are atomic (write-temp-then-rename); per-key serialization via a
//! keyed mutex map, no global lock.

use crate::error::{Result, StoreError};
use crate::selector::Selector;
use crate::{Kind, namespace_segment, record_creation, record_labels, stamp_identity};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::fs;
use tracing::debug;

pub struct DiskStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DiskStore {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn key_lock(&self, kind: Kind, namespace: &str, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let key = format!("{}/{namespace}/{name}", kind.segment());
        self.locks.lock().entry(key).or_default().clone()
    }

    fn record_path(&self, kind: Kind, namespace: &str, name: &str) -> PathBuf {
        self.root
            .join(kind.segment())
            .join(namespace_segment(namespace))
            .join(format!("{name}.json"))
    }

    pub async fn put(&self, kind: Kind, namespace: &str, name: &str, data: &[u8]) -> Result<Vec<u8>> {
        let lock = self.key_lock(kind, namespace, name);
        let _guard = lock.lock().await;

        let path = self.record_path(kind, namespace, name);
        let existing = read_optional(&path).await?;

        let mut value: Value = serde_json::from_slice(data).map_err(|e| {
            StoreError::SerializationError(format!("failed to decode {kind} payload"), e)
        })?;
        stamp_identity(&mut value, existing.as_deref())?;
        let stamped = serde_json::to_vec(&value).map_err(|e| {
            StoreError::SerializationError(format!("failed to encode {kind} record"), e)
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::IoError(format!("failed to create {parent:?}"), e))?;
        }

        let temp = path.with_extension("json.tmp");
        fs::write(&temp, &stamped)
            .await
            .map_err(|e| StoreError::IoError(format!("failed to write {temp:?}"), e))?;
        fs::rename(&temp, &path)
            .await
            .map_err(|e| StoreError::IoError(format!("failed to rename {temp:?}"), e))?;

        debug!(msg = "stored record", kind = %kind, namespace, name);
        Ok(stamped)
    }

    pub async fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Vec<u8>> {
        let path = self.record_path(kind, namespace, name);
        read_optional(&path).await?.ok_or(StoreError::NotFound)
    }

    pub async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        selector: Option<&Selector>,
    ) -> Result<Vec<Vec<u8>>> {
        let kind_dir = self.root.join(kind.segment());
        let namespaces = match namespace {
            Some(ns) => vec![kind_dir.join(namespace_segment(ns))],
            None => subdirectories(&kind_dir).await?,
        };

        let mut records = Vec::new();
        for dir in namespaces {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::IoError(format!("failed to read {dir:?}"), e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::IoError(format!("failed to read {dir:?}"), e))?
            {
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                let data = fs::read(&path)
                    .await
                    .map_err(|e| StoreError::IoError(format!("failed to read {path:?}"), e))?;
                if selector.is_none_or(|s| s.matches(&record_labels(&data))) {
                    records.push(data);
                }
            }
        }

        records.sort_by_key(|data| record_creation(data));
        Ok(records)
    }

    pub async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> Result<()> {
        let lock = self.key_lock(kind, namespace, name);
        let _guard = lock.lock().await;

        let path = self.record_path(kind, namespace, name);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(msg = "deleted record", kind = %kind, namespace, name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(StoreError::IoError(format!("failed to remove {path:?}"), e)),
        }
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::IoError(format!("failed to read {path:?}"), e)),
    }
}

async fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(StoreError::IoError(format!("failed to read {dir:?}"), e)),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::IoError(format!("failed to read {dir:?}"), e))?
    {
        if entry
            .file_type()
            .await
            .map_err(|e| StoreError::IoError(format!("failed to stat {:?}", entry.path()), e))?
            .is_dir()
        {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn config_map(name: &str, labels: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "default", "labels": labels},
            "data": {"key": "value"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());

        let written = store
            .put(Kind::ConfigMap, "default", "cfg", &config_map("cfg", json!({})))
            .await
            .unwrap();
        let read = store.get(Kind::ConfigMap, "default", "cfg").await.unwrap();
        assert_eq!(written, read);

        let value: Value = serde_json::from_slice(&read).unwrap();
        assert_eq!(value["metadata"]["resourceVersion"], "1");
    }

    #[tokio::test]
    async fn test_resource_version_strictly_increases() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());

        for expected in 1..=3u64 {
            let written = store
                .put(Kind::ConfigMap, "default", "cfg", &config_map("cfg", json!({})))
                .await
                .unwrap();
            let value: Value = serde_json::from_slice(&written).unwrap();
            assert_eq!(value["metadata"]["resourceVersion"], expected.to_string());
        }
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());

        let err = store.get(Kind::Secret, "default", "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());

        store
            .put(Kind::Secret, "default", "s", &config_map("s", json!({})))
            .await
            .unwrap();
        store.delete(Kind::Secret, "default", "s").await.unwrap();

        let err = store.delete(Kind::Secret, "default", "s").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_with_selector_and_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());

        store
            .put(
                Kind::ConfigMap,
                "default",
                "a",
                &config_map("a", json!({"app": "web"})),
            )
            .await
            .unwrap();
        store
            .put(
                Kind::ConfigMap,
                "default",
                "b",
                &config_map("b", json!({"app": "db"})),
            )
            .await
            .unwrap();
        store
            .put(
                Kind::ConfigMap,
                "team",
                "c",
                &config_map("c", json!({"app": "web"})),
            )
            .await
            .unwrap();

        let all = store.list(Kind::ConfigMap, None, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let scoped = store
            .list(Kind::ConfigMap, Some("default"), None)
            .await
            .unwrap();
        assert_eq!(scoped.len(), 2);

        let selector = Selector::parse("app=web").unwrap();
        let matched = store
            .list(Kind::ConfigMap, None, Some(&selector))
            .await
            .unwrap();
        assert_eq!(matched.len(), 2);

        let scoped_matched = store
            .list(Kind::ConfigMap, Some("team"), Some(&selector))
            .await
            .unwrap();
        assert_eq!(scoped_matched.len(), 1);
    }

    #[tokio::test]
    async fn test_list_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        let records = store.list(Kind::Namespace, None, None).await.unwrap();
        assert!(records.is_empty());
    }
}
