use crate::AppState;
use crate::error::Result;

use axum::Json;
use axum::extract::{Path, State};
use k8s_openapi::api::core::v1::Event;

pub async fn list_all(State(state): State<AppState>) -> Result<Json<k8s_openapi::List<Event>>> {
    let events = state.adapter.list_events().await?;
    Ok(Json(k8s_openapi::List {
        items: events,
        metadata: Default::default(),
    }))
}

pub async fn list(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Json<k8s_openapi::List<Event>>> {
    let events = state
        .adapter
        .list_events()
        .await?
        .into_iter()
        .filter(|event| event.metadata.namespace.as_deref() == Some(namespace.as_str()))
        .collect();
    Ok(Json(k8s_openapi::List {
        items: events,
        metadata: Default::default(),
    }))
}
