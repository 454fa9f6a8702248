//! Request middleware, outermost first: request-ID tagging, per-request
//! logging, bearer-token authentication, namespace pre-validation.

use crate::AppState;

use std::collections::HashMap;
use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Status, StatusDetails};
use tracing::info;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Ensure every request carries a request ID and echo it on the response.
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Ok(value) = HeaderValue::from_str(&id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
        let mut response = next.run(request).await;
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
        return response;
    }
    next.run(request).await
}

/// Record method, path, status and elapsed time.
pub async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let start = Instant::now();
    let response = next.run(request).await;

    info!(
        msg = "request handled",
        request_id = id,
        method = %method,
        path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
    );
    response
}

/// Bearer-token authentication. Token digests are compared so the plain
/// token never sticks around in request handling.
pub async fn authenticate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if k2d_core::token::digest(token) == state.token_digest => {
            next.run(request).await
        }
        _ => (StatusCode::UNAUTHORIZED, "invalid secret\n").into_response(),
    }
}

/// Resolve `{namespace}` from the path before the handler runs and answer
/// with a Kubernetes-shaped NotFound Status when it does not exist. Delete
/// routes are exempt so removal of leftovers keeps working.
pub async fn validate_namespace(
    State(state): State<AppState>,
    params: Option<Path<HashMap<String, String>>>,
    request: Request,
    next: Next,
) -> Response {
    let namespace = params.and_then(|Path(params)| params.get("namespace").cloned());
    let Some(namespace) = namespace else {
        return next.run(request).await;
    };
    let namespace = namespace.as_str();
    if request.method() == Method::DELETE {
        return next.run(request).await;
    }

    match state.adapter.get_namespace(namespace).await {
        Ok(_) => next.run(request).await,
        Err(k2d_adapter::Error::NotFound) => {
            (StatusCode::NOT_FOUND, Json(namespace_not_found(namespace))).into_response()
        }
        Err(e) => crate::error::ApiError::from(e).into_response(),
    }
}

fn namespace_not_found(namespace: &str) -> Status {
    Status {
        status: Some("Failure".to_string()),
        message: Some(format!("namespaces \"{namespace}\" not found")),
        reason: Some("NotFound".to_string()),
        code: Some(404),
        details: Some(StatusDetails {
            kind: Some("namespaces".to_string()),
            name: Some(namespace.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_namespace_not_found_shape() {
        let status = namespace_not_found("team");
        assert_eq!(status.status.as_deref(), Some("Failure"));
        assert_eq!(status.reason.as_deref(), Some("NotFound"));
        assert_eq!(status.code, Some(404));

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["kind"], "Status");
        assert_eq!(value["apiVersion"], "v1");
    }
}
