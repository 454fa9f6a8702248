//! Strategic-merge-patch: the kind-aware merge dialect Kubernetes clients
//! send. The base semantics (objects merge recursively, null deletes a key,
//! scalars replace) are RFC 7396 and delegated to [`json_patch::merge`];
//! the layer on top rewrites the well-known list fields so they merge
//! element-wise by their merge key instead of being replaced wholesale,
//! honoring `$patch: delete` directives inside keyed elements.

use serde_json::Value;

/// Merge keys of the list fields Kubernetes merges by element identity.
/// Everything not listed here follows JSON merge semantics (arrays are
/// replaced).
const MERGE_KEYS: &[(&str, &[&str])] = &[
    ("containers", &["name"]),
    ("initContainers", &["name"]),
    ("ephemeralContainers", &["name"]),
    ("env", &["name"]),
    ("ports", &["containerPort", "port"]),
    ("volumes", &["name"]),
    ("volumeMounts", &["mountPath"]),
    ("imagePullSecrets", &["name"]),
    ("tolerations", &["key"]),
    ("hostAliases", &["ip"]),
];

const PATCH_DIRECTIVE: &str = "$patch";

/// Apply a strategic-merge-patch to a live object and return the merged
/// object. The merge itself cannot fail.
pub fn strategic_merge(live: &Value, patch: &Value) -> Value {
    // pre-merge keyed lists into the patch, so the plain JSON merge below
    // (which replaces arrays wholesale) lands the strategic result
    let patch = resolve_keyed_lists(live, patch, None);
    let mut merged = live.clone();
    json_patch::merge(&mut merged, &patch);
    merged
}

/// Walk the patch alongside the live object, replacing every keyed-list
/// field with its fully merged form and stripping `$patch` directives.
fn resolve_keyed_lists(live: &Value, patch: &Value, field: Option<&str>) -> Value {
    match patch {
        Value::Object(patch_map) => {
            let live_map = live.as_object();
            Value::Object(
                patch_map
                    .iter()
                    .filter(|(key, _)| key.as_str() != PATCH_DIRECTIVE)
                    .map(|(key, patch_value)| {
                        let live_value = live_map
                            .and_then(|map| map.get(key))
                            .unwrap_or(&Value::Null);
                        (
                            key.clone(),
                            resolve_keyed_lists(live_value, patch_value, Some(key)),
                        )
                    })
                    .collect(),
            )
        }
        Value::Array(patch_items) => match field.and_then(merge_key_for) {
            Some(keys) => {
                let live_items = live.as_array().map(Vec::as_slice).unwrap_or(&[]);
                merge_keyed_list(live_items, patch_items, keys)
            }
            None => patch.clone(),
        },
        _ => patch.clone(),
    }
}

fn merge_key_for(field: &str) -> Option<&'static [&'static str]> {
    MERGE_KEYS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, keys)| *keys)
}

fn merge_keyed_list(live: &[Value], patch: &[Value], keys: &[&str]) -> Value {
    // the first merge key present in any element decides the identity field
    let key = keys
        .iter()
        .find(|key| {
            live.iter()
                .chain(patch.iter())
                .any(|item| item.get(**key).is_some())
        })
        .copied();
    let Some(key) = key else {
        return Value::Array(patch.to_vec());
    };

    let mut merged: Vec<Value> = live.to_vec();
    for patch_item in patch {
        let identity = patch_item.get(key);
        let position = merged
            .iter()
            .position(|item| identity.is_some() && item.get(key) == identity);

        let deleted = patch_item
            .get(PATCH_DIRECTIVE)
            .and_then(Value::as_str)
            .is_some_and(|directive| directive == "delete");

        match (position, deleted) {
            (Some(idx), true) => {
                merged.remove(idx);
            }
            (Some(idx), false) => {
                merged[idx] = strategic_merge(&merged[idx], patch_item);
            }
            (None, true) => {}
            (None, false) => merged.push(patch_item.clone()),
        }
    }
    Value::Array(merged)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_and_object_merge() {
        let live = json!({"metadata": {"name": "cfg", "labels": {"a": "1"}}, "data": {"k": "v"}});
        let patch = json!({"data": {"k": "v2", "extra": "x"}});

        let merged = strategic_merge(&live, &patch);
        assert_eq!(merged["data"]["k"], "v2");
        assert_eq!(merged["data"]["extra"], "x");
        assert_eq!(merged["metadata"]["name"], "cfg");
        assert_eq!(merged["metadata"]["labels"]["a"], "1");
    }

    #[test]
    fn test_null_deletes_key() {
        let live = json!({"data": {"keep": "1", "drop": "2"}});
        let patch = json!({"data": {"drop": null}});

        let merged = strategic_merge(&live, &patch);
        assert_eq!(merged["data"]["keep"], "1");
        assert!(merged["data"].get("drop").is_none());
    }

    #[test]
    fn test_containers_merge_by_name() {
        let live = json!({"spec": {"template": {"spec": {"containers": [
            {"name": "app", "image": "nginx:1.24", "env": [{"name": "A", "value": "1"}]},
            {"name": "sidecar", "image": "busybox"}
        ]}}}});
        let patch = json!({"spec": {"template": {"spec": {"containers": [
            {"name": "app", "image": "nginx:1.25"}
        ]}}}});

        let merged = strategic_merge(&live, &patch);
        let containers = merged["spec"]["template"]["spec"]["containers"]
            .as_array()
            .unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0]["image"], "nginx:1.25");
        // untouched fields of the merged element survive
        assert_eq!(containers[0]["env"][0]["value"], "1");
        assert_eq!(containers[1]["name"], "sidecar");
    }

    #[test]
    fn test_keyed_list_appends_new_element() {
        let live = json!({"spec": {"containers": [{"name": "app", "image": "nginx"}]}});
        let patch = json!({"spec": {"containers": [{"name": "extra", "image": "redis"}]}});

        let merged = strategic_merge(&live, &patch);
        let containers = merged["spec"]["containers"].as_array().unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[1]["name"], "extra");
    }

    #[test]
    fn test_patch_delete_directive() {
        let live = json!({"spec": {"containers": [
            {"name": "app", "image": "nginx"},
            {"name": "sidecar", "image": "busybox"}
        ]}});
        let patch = json!({"spec": {"containers": [
            {"name": "sidecar", "$patch": "delete"}
        ]}});

        let merged = strategic_merge(&live, &patch);
        let containers = merged["spec"]["containers"].as_array().unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0]["name"], "app");
    }

    #[test]
    fn test_unkeyed_array_is_replaced() {
        let live = json!({"spec": {"finalizers": ["a", "b"]}});
        let patch = json!({"spec": {"finalizers": ["c"]}});

        let merged = strategic_merge(&live, &patch);
        assert_eq!(merged["spec"]["finalizers"], json!(["c"]));
    }

    #[test]
    fn test_service_ports_merge_by_port() {
        let live = json!({"spec": {"ports": [
            {"port": 80, "targetPort": 8080},
            {"port": 443, "targetPort": 8443}
        ]}});
        let patch = json!({"spec": {"ports": [{"port": 80, "targetPort": 9090}]}});

        let merged = strategic_merge(&live, &patch);
        let ports = merged["spec"]["ports"].as_array().unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0]["targetPort"], 9090);
        assert_eq!(ports[1]["port"], 443);
    }

    #[test]
    fn test_label_update_roundtrip() {
        let live = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cfg", "namespace": "default", "labels": {"app": "web"}},
            "data": {"k": "v"}
        });
        let patch = json!({"metadata": {"labels": {"tier": "front"}}});

        let merged = strategic_merge(&live, &patch);
        assert_eq!(merged["metadata"]["labels"]["app"], "web");
        assert_eq!(merged["metadata"]["labels"]["tier"], "front");
        assert_eq!(merged["kind"], "ConfigMap");
    }
}
