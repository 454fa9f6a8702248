pub mod disk;
pub mod error;
pub mod selector;
pub mod volume;

pub use disk::DiskStore;
pub use error::{Result, StoreError};
pub use selector::Selector;
pub use volume::VolumeStore;

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

/// Resource kinds persisted in the store: those without a native container
/// engine analogue, plus Services awaiting their workload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    ConfigMap,
    Secret,
    Namespace,
    Service,
    PersistentVolumeClaim,
}

impl Kind {
    pub const ALL: [Kind; 5] = [
        Kind::ConfigMap,
        Kind::Secret,
        Kind::Namespace,
        Kind::Service,
        Kind::PersistentVolumeClaim,
    ];

    /// Directory / volume segment for this kind.
    pub fn segment(&self) -> &'static str {
        match self {
            Kind::ConfigMap => "configmaps",
            Kind::Secret => "secrets",
            Kind::Namespace => "namespaces",
            Kind::Service => "services",
            Kind::PersistentVolumeClaim => "persistentvolumeclaims",
        }
    }
}

serde_plain::derive_display_from_serialize!(Kind);

/// The chosen persistence backend, bound once at bootstrap.
pub enum StoreBackend {
    Disk(DiskStore),
    Volume(VolumeStore),
}

impl StoreBackend {
    /// Idempotent overwrite. Identity metadata of an existing record is
    /// preserved and its resource version incremented; first writes are
    /// assigned a uid and creation timestamp. Returns the written bytes.
    pub async fn put(&self, kind: Kind, namespace: &str, name: &str, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            StoreBackend::Disk(store) => store.put(kind, namespace, name, data).await,
            StoreBackend::Volume(store) => store.put(kind, namespace, name, data).await,
        }
    }

    pub async fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Vec<u8>> {
        match self {
            StoreBackend::Disk(store) => store.get(kind, namespace, name).await,
            StoreBackend::Volume(store) => store.get(kind, namespace, name).await,
        }
    }

    /// Matching records, oldest first. `namespace` of `None` spans all
    /// namespaces; the selector uses the Kubernetes grammar.
    pub async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        selector: Option<&Selector>,
    ) -> Result<Vec<Vec<u8>>> {
        match self {
            StoreBackend::Disk(store) => store.list(kind, namespace, selector).await,
            StoreBackend::Volume(store) => store.list(kind, namespace, selector).await,
        }
    }

    pub async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> Result<()> {
        match self {
            StoreBackend::Disk(store) => store.delete(kind, namespace, name).await,
            StoreBackend::Volume(store) => store.delete(kind, namespace, name).await,
        }
    }
}

/// Stamp Kubernetes identity onto a record about to be written.
///
/// Labels and annotations are taken from the incoming object as-is; uid and
/// creation timestamp survive from the previous record when one exists; the
/// resource version is strictly increasing per key.
pub(crate) fn stamp_identity(incoming: &mut Value, existing: Option<&[u8]>) -> Result<()> {
    let previous: Option<Value> = match existing {
        Some(bytes) => Some(serde_json::from_slice(bytes).map_err(|e| {
            StoreError::SerializationError("failed to decode existing record".to_string(), e)
        })?),
        None => None,
    };

    let metadata = incoming
        .as_object_mut()
        .ok_or_else(|| StoreError::InvalidPayload("expected a JSON object".to_string()))?
        .entry("metadata")
        .or_insert_with(|| Value::Object(Default::default()));
    let metadata = metadata
        .as_object_mut()
        .ok_or_else(|| StoreError::InvalidPayload("metadata must be an object".to_string()))?;

    let previous_meta = previous.as_ref().and_then(|p| p.get("metadata"));

    let uid = previous_meta
        .and_then(|m| m.get("uid"))
        .cloned()
        .or_else(|| metadata.get("uid").cloned())
        .unwrap_or_else(|| Value::String(uuid::Uuid::new_v4().to_string()));
    metadata.insert("uid".to_string(), uid);

    let creation = previous_meta
        .and_then(|m| m.get("creationTimestamp"))
        .cloned()
        .or_else(|| metadata.get("creationTimestamp").cloned())
        .unwrap_or_else(|| {
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
        });
    metadata.insert("creationTimestamp".to_string(), creation);

    let version = previous_meta
        .and_then(|m| m.get("resourceVersion"))
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    metadata.insert("resourceVersion".to_string(), Value::String(version.to_string()));

    Ok(())
}

/// Directory segment for a record's namespace. Cluster-scoped records
/// (Namespaces) carry an empty namespace and live under `_`.
pub(crate) fn namespace_segment(namespace: &str) -> &str {
    if namespace.is_empty() { "_" } else { namespace }
}

/// Labels of a serialized record, for selector matching.
pub(crate) fn record_labels(data: &[u8]) -> BTreeMap<String, String> {
    serde_json::from_slice::<Value>(data)
        .ok()
        .as_ref()
        .and_then(|v| v.get("metadata"))
        .and_then(|m| m.get("labels"))
        .and_then(|l| serde_json::from_value(l.clone()).ok())
        .unwrap_or_default()
}

/// Creation timestamp of a serialized record, for insertion-ordered listings.
pub(crate) fn record_creation(data: &[u8]) -> String {
    serde_json::from_slice::<Value>(data)
        .ok()
        .as_ref()
        .and_then(|v| v.get("metadata"))
        .and_then(|m| m.get("creationTimestamp"))
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stamp_identity_first_write() {
        let mut value = json!({"kind": "ConfigMap", "metadata": {"name": "cfg"}});
        stamp_identity(&mut value, None).unwrap();

        let metadata = &value["metadata"];
        assert_eq!(metadata["resourceVersion"], "1");
        assert!(metadata["uid"].as_str().is_some_and(|u| !u.is_empty()));
        assert!(metadata["creationTimestamp"].as_str().is_some());
    }

    #[test]
    fn test_stamp_identity_preserves_previous() {
        let mut first = json!({"kind": "ConfigMap", "metadata": {"name": "cfg"}});
        stamp_identity(&mut first, None).unwrap();
        let first_bytes = serde_json::to_vec(&first).unwrap();

        let mut second = json!({
            "kind": "ConfigMap",
            "metadata": {"name": "cfg", "labels": {"app": "web"}}
        });
        stamp_identity(&mut second, Some(&first_bytes)).unwrap();

        assert_eq!(second["metadata"]["uid"], first["metadata"]["uid"]);
        assert_eq!(
            second["metadata"]["creationTimestamp"],
            first["metadata"]["creationTimestamp"]
        );
        assert_eq!(second["metadata"]["resourceVersion"], "2");
        assert_eq!(second["metadata"]["labels"]["app"], "web");
    }

    #[test]
    fn test_stamp_identity_rejects_non_object() {
        let mut value = json!([1, 2, 3]);
        assert!(stamp_identity(&mut value, None).is_err());
    }
}
