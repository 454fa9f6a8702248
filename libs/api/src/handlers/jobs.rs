use crate::AppState;
use crate::error::Result;
use crate::handlers::{
    ListQuery, WriteQuery, apply_namespace, enqueue, list_response, merge_patch, parse_selector,
    success_status,
};
use crate::table::jobs_table;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use k2d_adapter::convert::request::WorkloadKind;
use k2d_core::operation::OperationPayload;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;

pub async fn list_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let selector = parse_selector(&query)?;
    let jobs = state.adapter.list_jobs(None, selector.as_ref()).await?;
    Ok(list_response(&headers, jobs, jobs_table))
}

pub async fn list(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let selector = parse_selector(&query)?;
    let jobs = state
        .adapter
        .list_jobs(Some(&namespace), selector.as_ref())
        .await?;
    Ok(list_response(&headers, jobs, jobs_table))
}

pub async fn get(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Job>> {
    Ok(Json(state.adapter.get_job(&namespace, &name).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Query(query): Query<WriteQuery>,
    Json(mut job): Json<Job>,
) -> Result<Json<Job>> {
    apply_namespace(&mut job.metadata, &namespace);
    if query.is_dry_run() {
        return Ok(Json(job));
    }
    enqueue(&state, OperationPayload::Job(job.clone()), &headers)?;
    Ok(Json(job))
}

pub async fn patch(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Job>> {
    let live = state.adapter.get_job(&namespace, &name).await?;
    let merged: Job = merge_patch(&live, &body)?;
    enqueue(&state, OperationPayload::Job(merged.clone()), &headers)?;
    Ok(Json(merged))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Status>> {
    state
        .adapter
        .delete_workload(WorkloadKind::Job, &namespace, &name)
        .await?;
    Ok(success_status())
}
