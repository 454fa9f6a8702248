use crate::AppState;
use crate::error::Result;
use crate::handlers::{
    ListQuery, WriteQuery, apply_namespace, enqueue, list_response, merge_patch, parse_selector,
    success_status,
};
use crate::table::config_maps_table;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use k2d_core::operation::OperationPayload;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;

pub async fn list_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let selector = parse_selector(&query)?;
    let config_maps = state
        .adapter
        .list_config_maps(None, selector.as_ref())
        .await?;
    Ok(list_response(&headers, config_maps, config_maps_table))
}

pub async fn list(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let selector = parse_selector(&query)?;
    let config_maps = state
        .adapter
        .list_config_maps(Some(&namespace), selector.as_ref())
        .await?;
    Ok(list_response(&headers, config_maps, config_maps_table))
}

pub async fn get(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<ConfigMap>> {
    Ok(Json(state.adapter.get_config_map(&namespace, &name).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Query(query): Query<WriteQuery>,
    Json(mut config_map): Json<ConfigMap>,
) -> Result<Json<ConfigMap>> {
    apply_namespace(&mut config_map.metadata, &namespace);
    if query.is_dry_run() {
        return Ok(Json(config_map));
    }
    enqueue(
        &state,
        OperationPayload::ConfigMap(config_map.clone()),
        &headers,
    )?;
    Ok(Json(config_map))
}

pub async fn patch(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ConfigMap>> {
    let live = state.adapter.get_config_map(&namespace, &name).await?;
    let merged: ConfigMap = merge_patch(&live, &body)?;
    enqueue(
        &state,
        OperationPayload::ConfigMap(merged.clone()),
        &headers,
    )?;
    Ok(Json(merged))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Status>> {
    state.adapter.delete_config_map(&namespace, &name).await?;
    Ok(success_status())
}
