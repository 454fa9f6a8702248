use crate::AppState;
use crate::error::Result;
use crate::handlers::{
    ListQuery, WriteQuery, apply_namespace, enqueue, list_response, merge_patch, parse_selector,
    success_status,
};
use crate::table::services_table;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use k2d_core::operation::OperationPayload;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;

pub async fn list_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let selector = parse_selector(&query)?;
    let services = state.adapter.list_services(None, selector.as_ref()).await?;
    Ok(list_response(&headers, services, services_table))
}

pub async fn list(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let selector = parse_selector(&query)?;
    let services = state
        .adapter
        .list_services(Some(&namespace), selector.as_ref())
        .await?;
    Ok(list_response(&headers, services, services_table))
}

pub async fn get(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Service>> {
    Ok(Json(state.adapter.get_service(&namespace, &name).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Query(query): Query<WriteQuery>,
    Json(mut service): Json<Service>,
) -> Result<Json<Service>> {
    apply_namespace(&mut service.metadata, &namespace);
    if query.is_dry_run() {
        return Ok(Json(service));
    }
    enqueue(&state, OperationPayload::Service(service.clone()), &headers)?;
    Ok(Json(service))
}

pub async fn patch(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Service>> {
    let live = state.adapter.get_service(&namespace, &name).await?;
    let merged: Service = merge_patch(&live, &body)?;
    enqueue(&state, OperationPayload::Service(merged.clone()), &headers)?;
    Ok(Json(merged))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Status>> {
    state.adapter.delete_service(&namespace, &name).await?;
    Ok(success_status())
}
