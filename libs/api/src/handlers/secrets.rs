use crate::AppState;
use crate::error::{ApiError, Result};
use crate::handlers::{
    ListQuery, WriteQuery, apply_namespace, enqueue, list_response, merge_patch, parse_selector,
    success_status,
};
use crate::table::secrets_table;

use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use backon::{ConstantBuilder, Retryable};
use k2d_core::operation::OperationPayload;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;

/// How long a PUT waits for the secret to surface (clients often PUT before
/// their prior POST has been drained by the controller).
const REPLACE_RETRY_DELAY: Duration = Duration::from_secs(1);
const REPLACE_RETRY_ATTEMPTS: usize = 10;

pub async fn list_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let selector = parse_selector(&query)?;
    let secrets = state.adapter.list_secrets(None, selector.as_ref()).await?;
    Ok(list_response(&headers, secrets, secrets_table))
}

pub async fn list(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Response> {
    let selector = parse_selector(&query)?;
    let secrets = state
        .adapter
        .list_secrets(Some(&namespace), selector.as_ref())
        .await?;
    Ok(list_response(&headers, secrets, secrets_table))
}

pub async fn get(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Secret>> {
    Ok(Json(state.adapter.get_secret(&namespace, &name).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Query(query): Query<WriteQuery>,
    Json(mut secret): Json<Secret>,
) -> Result<Json<Secret>> {
    apply_namespace(&mut secret.metadata, &namespace);
    if query.is_dry_run() {
        return Ok(Json(secret));
    }
    enqueue(&state, OperationPayload::Secret(secret.clone()), &headers)?;
    Ok(Json(secret))
}

/// PUT waits for the secret to become visible before overwriting: the
/// client may race its own POST, which is still queued in the operation
/// controller.
pub async fn replace(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(mut secret): Json<Secret>,
) -> Result<Json<Secret>> {
    let adapter = state.adapter.clone();
    let poll = {
        let namespace = namespace.clone();
        let name = name.clone();
        move || {
            let adapter = adapter.clone();
            let namespace = namespace.clone();
            let name = name.clone();
            async move { adapter.get_secret(&namespace, &name).await }
        }
    };

    let outcome = poll
        .retry(
            ConstantBuilder::default()
                .with_delay(REPLACE_RETRY_DELAY)
                .with_max_times(REPLACE_RETRY_ATTEMPTS),
        )
        .when(k2d_adapter::Error::is_not_found)
        .await;

    match outcome {
        Ok(_) => {
            apply_namespace(&mut secret.metadata, &namespace);
            secret.metadata.name = Some(name);
            let written = state.adapter.create_secret(secret).await?;
            Ok(Json(written))
        }
        Err(k2d_adapter::Error::NotFound) => Err(ApiError::NotFound),
        Err(e) => Err(e.into()),
    }
}

pub async fn patch(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Secret>> {
    let live = state.adapter.get_secret(&namespace, &name).await?;
    let merged: Secret = merge_patch(&live, &body)?;
    enqueue(&state, OperationPayload::Secret(merged.clone()), &headers)?;
    Ok(Json(merged))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Status>> {
    state.adapter.delete_secret(&namespace, &name).await?;
    Ok(success_status())
}
