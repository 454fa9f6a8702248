use crate::AppState;
use crate::error::Result;
use crate::handlers::{
    ListQuery, WriteQuery, apply_namespace, enqueue, parse_selector, success_status,
};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use k2d_core::operation::OperationPayload;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;

pub async fn list_persistent_volumes(
    State(state): State<AppState>,
) -> Result<Json<k8s_openapi::List<PersistentVolume>>> {
    let volumes = state.adapter.list_persistent_volumes().await?;
    Ok(Json(k8s_openapi::List {
        items: volumes,
        metadata: Default::default(),
    }))
}

pub async fn get_persistent_volume(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PersistentVolume>> {
    Ok(Json(state.adapter.get_persistent_volume(&name).await?))
}

pub async fn list_claims_all(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<k8s_openapi::List<PersistentVolumeClaim>>> {
    let selector = parse_selector(&query)?;
    let claims = state
        .adapter
        .list_persistent_volume_claims(None, selector.as_ref())
        .await?;
    Ok(Json(k8s_openapi::List {
        items: claims,
        metadata: Default::default(),
    }))
}

pub async fn list_claims(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<k8s_openapi::List<PersistentVolumeClaim>>> {
    let selector = parse_selector(&query)?;
    let claims = state
        .adapter
        .list_persistent_volume_claims(Some(&namespace), selector.as_ref())
        .await?;
    Ok(Json(k8s_openapi::List {
        items: claims,
        metadata: Default::default(),
    }))
}

pub async fn get_claim(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<PersistentVolumeClaim>> {
    Ok(Json(
        state
            .adapter
            .get_persistent_volume_claim(&namespace, &name)
            .await?,
    ))
}

pub async fn create_claim(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Query(query): Query<WriteQuery>,
    Json(mut claim): Json<PersistentVolumeClaim>,
) -> Result<Json<PersistentVolumeClaim>> {
    apply_namespace(&mut claim.metadata, &namespace);
    if query.is_dry_run() {
        return Ok(Json(claim));
    }
    enqueue(
        &state,
        OperationPayload::PersistentVolumeClaim(claim.clone()),
        &headers,
    )?;
    Ok(Json(claim))
}

pub async fn delete_claim(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Status>> {
    state
        .adapter
        .delete_persistent_volume_claim(&namespace, &name)
        .await?;
    Ok(success_status())
}
