use crate::AppState;
use crate::error::Result;
use crate::handlers::{
    ListQuery, WriteQuery, apply_namespace, enqueue, list_response, merge_patch, parse_selector,
    success_status,
};
use crate::table::pods_table;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, header};
use axum::response::Response;
use k2d_adapter::convert::request::WorkloadKind;
use k2d_adapter::logs::LogStreamOptions;
use k2d_core::operation::OperationPayload;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;

pub async fn list_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let selector = parse_selector(&query)?;
    let pods = state.adapter.list_pods(None, selector.as_ref()).await?;
    Ok(list_response(&headers, pods, pods_table))
}

pub async fn list(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let selector = parse_selector(&query)?;
    let pods = state
        .adapter
        .list_pods(Some(&namespace), selector.as_ref())
        .await?;
    Ok(list_response(&headers, pods, pods_table))
}

pub async fn get(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Pod>> {
    Ok(Json(state.adapter.get_pod(&namespace, &name).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Query(query): Query<WriteQuery>,
    Json(mut pod): Json<Pod>,
) -> Result<Json<Pod>> {
    apply_namespace(&mut pod.metadata, &namespace);
    if query.is_dry_run() {
        return Ok(Json(pod));
    }
    enqueue(&state, OperationPayload::Pod(pod.clone()), &headers)?;
    Ok(Json(pod))
}

pub async fn patch(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Pod>> {
    let live = state.adapter.get_pod(&namespace, &name).await?;
    let merged: Pod = merge_patch(&live, &body)?;
    enqueue(&state, OperationPayload::Pod(merged.clone()), &headers)?;
    Ok(Json(merged))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Status>> {
    state
        .adapter
        .delete_workload(WorkloadKind::Pod, &namespace, &name)
        .await?;
    Ok(success_status())
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQuery {
    pub follow: Option<bool>,
    pub timestamps: Option<bool>,
    pub tail_lines: Option<i64>,
}

/// Stream container logs. The response is raw bytes; in follow mode the
/// body stays open until the client goes away.
pub async fn logs(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(query): Query<LogQuery>,
) -> Result<Response> {
    let stream = state
        .adapter
        .pod_logs(
            &namespace,
            &name,
            LogStreamOptions {
                follow: query.follow.unwrap_or(false),
                timestamps: query.timestamps.unwrap_or(false),
                tail_lines: query.tail_lines,
            },
        )
        .await?;

    Ok(Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .expect("log response"))
}
