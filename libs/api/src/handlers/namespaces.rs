use crate::AppState;
use crate::error::Result;
use crate::handlers::{WriteQuery, enqueue, list_response, success_status};
use crate::table::namespaces_table;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use k2d_core::operation::OperationPayload;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;

pub async fn list(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let namespaces = state.adapter.list_namespaces().await?;
    Ok(list_response(&headers, namespaces, namespaces_table))
}

pub async fn get(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Namespace>> {
    Ok(Json(state.adapter.get_namespace(&name).await?))
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WriteQuery>,
    Json(namespace): Json<Namespace>,
) -> Result<Json<Namespace>> {
    if query.is_dry_run() {
        return Ok(Json(namespace));
    }
    enqueue(
        &state,
        OperationPayload::Namespace(namespace.clone()),
        &headers,
    )?;
    Ok(Json(namespace))
}

/// Cascades: every workload container attached to the namespace network is
/// removed along with the network. The default namespace is refused.
pub async fn delete(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Status>> {
    state.adapter.delete_namespace(&name).await?;
    Ok(success_status())
}
