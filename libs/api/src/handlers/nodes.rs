use crate::AppState;
use crate::error::Result;
use crate::handlers::list_response;
use crate::table::nodes_table;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use k8s_openapi::api::core::v1::Node;

pub async fn list(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let nodes = state.adapter.list_nodes().await?;
    Ok(list_response(&headers, nodes, nodes_table))
}

pub async fn get(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<Node>> {
    Ok(Json(state.adapter.get_node(&name).await?))
}
