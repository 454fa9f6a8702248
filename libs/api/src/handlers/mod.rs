pub mod configmaps;
pub mod deployments;
pub mod events;
pub mod jobs;
pub mod meta;
pub mod namespaces;
pub mod nodes;
pub mod pods;
pub mod secrets;
pub mod services;
pub mod system;
pub mod volumes;

use crate::AppState;
use crate::error::{ApiError, Result};
use crate::middleware::REQUEST_ID_HEADER;
use crate::patch::strategic_merge;
use crate::table::Table;

use axum::Json;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use k2d_core::operation::{Operation, OperationPayload};
use k2d_store::Selector;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Status};
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListQuery {
    pub label_selector: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WriteQuery {
    pub dry_run: Option<String>,
}

impl WriteQuery {
    pub fn is_dry_run(&self) -> bool {
        self.dry_run.as_deref().is_some_and(|value| !value.is_empty())
    }
}

pub(crate) fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn parse_selector(query: &ListQuery) -> Result<Option<Selector>> {
    match query.label_selector.as_deref() {
        None => Ok(None),
        Some(raw) => Ok(Some(Selector::parse(raw)?)),
    }
}

/// Table projection is requested through media type parameters on Accept.
pub(crate) fn wants_table(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("as=Table") && accept.contains("g=meta.k8s.io"))
}

/// Typed versioned list or Table projection, negotiated per request.
pub(crate) fn list_response<T>(
    headers: &HeaderMap,
    items: Vec<T>,
    table: fn(&[T]) -> Table,
) -> Response
where
    T: Serialize + k8s_openapi::ListableResource,
{
    if wants_table(headers) {
        Json(table(&items)).into_response()
    } else {
        Json(k8s_openapi::List {
            items,
            metadata: Default::default(),
        })
        .into_response()
    }
}

/// Force the namespace from the request path onto the object; objects
/// without any namespace land in `default`.
pub(crate) fn apply_namespace(metadata: &mut ObjectMeta, namespace: &str) {
    metadata.namespace = Some(namespace.to_string());
}

pub(crate) fn enqueue(
    state: &AppState,
    payload: OperationPayload,
    headers: &HeaderMap,
) -> Result<()> {
    state
        .operations
        .send(Operation::new(payload, request_id(headers)))
        .map_err(|_| ApiError::Internal("operation controller is not running".to_string()))
}

/// Apply a strategic-merge-patch body to a live object.
pub(crate) fn merge_patch<T>(live: &T, patch_bytes: &[u8]) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let live_value = serde_json::to_value(live)
        .map_err(|e| ApiError::internal("failed to encode live object", e))?;
    let patch_value: serde_json::Value = serde_json::from_slice(patch_bytes)
        .map_err(|e| ApiError::BadRequest(format!("invalid patch body: {e}")))?;
    let merged = strategic_merge(&live_value, &patch_value);
    serde_json::from_value(merged)
        .map_err(|e| ApiError::BadRequest(format!("patched object is invalid: {e}")))
}

pub(crate) fn success_status() -> Json<Status> {
    Json(Status {
        status: Some("Success".to_string()),
        code: Some(200),
        ..Default::default()
    })
}
