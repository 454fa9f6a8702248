use crate::AppState;
use crate::error::Result;
use crate::handlers::{
    ListQuery, WriteQuery, apply_namespace, enqueue, list_response, merge_patch, parse_selector,
    success_status,
};
use crate::table::deployments_table;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use k2d_adapter::convert::request::WorkloadKind;
use k2d_core::operation::OperationPayload;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;

pub async fn list_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let selector = parse_selector(&query)?;
    let deployments = state
        .adapter
        .list_deployments(None, selector.as_ref())
        .await?;
    Ok(list_response(&headers, deployments, deployments_table))
}

pub async fn list(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let selector = parse_selector(&query)?;
    let deployments = state
        .adapter
        .list_deployments(Some(&namespace), selector.as_ref())
        .await?;
    Ok(list_response(&headers, deployments, deployments_table))
}

pub async fn get(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Deployment>> {
    Ok(Json(state.adapter.get_deployment(&namespace, &name).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Query(query): Query<WriteQuery>,
    Json(mut deployment): Json<Deployment>,
) -> Result<Json<Deployment>> {
    apply_namespace(&mut deployment.metadata, &namespace);
    if query.is_dry_run() {
        return Ok(Json(deployment));
    }
    enqueue(
        &state,
        OperationPayload::Deployment(deployment.clone()),
        &headers,
    )?;
    Ok(Json(deployment))
}

pub async fn patch(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Deployment>> {
    let live = state.adapter.get_deployment(&namespace, &name).await?;
    let merged: Deployment = merge_patch(&live, &body)?;
    enqueue(
        &state,
        OperationPayload::Deployment(merged.clone()),
        &headers,
    )?;
    Ok(Json(merged))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Status>> {
    state
        .adapter
        .delete_workload(WorkloadKind::Deployment, &namespace, &name)
        .await?;
    Ok(success_status())
}
