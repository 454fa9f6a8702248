pub mod discovery;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod patch;
pub mod table;

pub use error::{ApiError, Result};
pub use openapi::OpenApiCache;

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use k2d_adapter::EngineAdapter;
use k2d_core::config::Config;
use k2d_core::operation::Operation;
use tokio::sync::mpsc;

/// Shared state of the HTTP surface. Cloned per request; everything heavy
/// sits behind an [`Arc`].
#[derive(Clone)]
pub struct AppState {
    pub adapter: Arc<EngineAdapter>,
    pub operations: mpsc::UnboundedSender<Operation>,
    pub openapi: Arc<OpenApiCache>,
    pub config: Arc<Config>,
    pub token: String,
    pub token_digest: [u8; 32],
    pub advertised_address: String,
    pub port: u16,
}

async fn openapi_spec(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.openapi.respond(&headers)
}

/// Assemble the full route table. `/version` and `/healthz` are public;
/// everything else sits behind bearer auth, with namespace pre-validation
/// on namespaced routes.
pub fn router(state: AppState) -> Router {
    use handlers::{
        configmaps, deployments, events, jobs, namespaces, nodes, pods, secrets, services, system,
        volumes,
    };

    let protected = Router::new()
        // discovery
        .route("/api", get(discovery::api_versions))
        .route("/api/v1", get(discovery::core_v1_resources))
        .route("/apis", get(discovery::api_groups))
        .route("/apis/apps", get(discovery::apps_group))
        .route("/apis/apps/v1", get(discovery::apps_v1_resources))
        .route("/apis/batch", get(discovery::batch_group))
        .route("/apis/batch/v1", get(discovery::batch_v1_resources))
        .route(
            "/apis/events.k8s.io/v1",
            get(|| async { discovery::empty_group_resources("events.k8s.io/v1".to_string()).await }),
        )
        .route(
            "/apis/authorization.k8s.io/v1",
            get(|| async {
                discovery::empty_group_resources("authorization.k8s.io/v1".to_string()).await
            }),
        )
        .route(
            "/apis/storage.k8s.io/v1",
            get(|| async { discovery::empty_group_resources("storage.k8s.io/v1".to_string()).await }),
        )
        .route(
            "/apis/metrics.k8s.io/v1beta1",
            get(|| async {
                discovery::empty_group_resources("metrics.k8s.io/v1beta1".to_string()).await
            }),
        )
        // openapi self-description
        .route("/openapi/v2", get(openapi_spec))
        // namespaces
        .route(
            "/api/v1/namespaces",
            get(namespaces::list).post(namespaces::create),
        )
        .route(
            "/api/v1/namespaces/{namespace}",
            get(namespaces::get).delete(namespaces::delete),
        )
        // pods
        .route("/api/v1/pods", get(pods::list_all))
        .route(
            "/api/v1/namespaces/{namespace}/pods",
            get(pods::list).post(pods::create),
        )
        .route(
            "/api/v1/namespaces/{namespace}/pods/{name}",
            get(pods::get).patch(pods::patch).delete(pods::delete),
        )
        .route(
            "/api/v1/namespaces/{namespace}/pods/{name}/log",
            get(pods::logs),
        )
        // services
        .route("/api/v1/services", get(services::list_all))
        .route(
            "/api/v1/namespaces/{namespace}/services",
            get(services::list).post(services::create),
        )
        .route(
            "/api/v1/namespaces/{namespace}/services/{name}",
            get(services::get)
                .patch(services::patch)
                .delete(services::delete),
        )
        // configmaps
        .route("/api/v1/configmaps", get(configmaps::list_all))
        .route(
            "/api/v1/namespaces/{namespace}/configmaps",
            get(configmaps::list).post(configmaps::create),
        )
        .route(
            "/api/v1/namespaces/{namespace}/configmaps/{name}",
            get(configmaps::get)
                .patch(configmaps::patch)
                .delete(configmaps::delete),
        )
        // secrets
        .route("/api/v1/secrets", get(secrets::list_all))
        .route(
            "/api/v1/namespaces/{namespace}/secrets",
            get(secrets::list).post(secrets::create),
        )
        .route(
            "/api/v1/namespaces/{namespace}/secrets/{name}",
            get(secrets::get)
                .put(secrets::replace)
                .patch(secrets::patch)
                .delete(secrets::delete),
        )
        // nodes
        .route("/api/v1/nodes", get(nodes::list))
        .route("/api/v1/nodes/{name}", get(nodes::get))
        // events
        .route("/api/v1/events", get(events::list_all))
        .route("/api/v1/namespaces/{namespace}/events", get(events::list))
        // persistent volumes and claims
        .route(
            "/api/v1/persistentvolumes",
            get(volumes::list_persistent_volumes),
        )
        .route(
            "/api/v1/persistentvolumes/{name}",
            get(volumes::get_persistent_volume),
        )
        .route(
            "/api/v1/persistentvolumeclaims",
            get(volumes::list_claims_all),
        )
        .route(
            "/api/v1/namespaces/{namespace}/persistentvolumeclaims",
            get(volumes::list_claims).post(volumes::create_claim),
        )
        .route(
            "/api/v1/namespaces/{namespace}/persistentvolumeclaims/{name}",
            get(volumes::get_claim).delete(volumes::delete_claim),
        )
        // apps/v1
        .route("/apis/apps/v1/deployments", get(deployments::list_all))
        .route(
            "/apis/apps/v1/namespaces/{namespace}/deployments",
            get(deployments::list).post(deployments::create),
        )
        .route(
            "/apis/apps/v1/namespaces/{namespace}/deployments/{name}",
            get(deployments::get)
                .patch(deployments::patch)
                .delete(deployments::delete),
        )
        // batch/v1
        .route("/apis/batch/v1/jobs", get(jobs::list_all))
        .route(
            "/apis/batch/v1/namespaces/{namespace}/jobs",
            get(jobs::list).post(jobs::create),
        )
        .route(
            "/apis/batch/v1/namespaces/{namespace}/jobs/{name}",
            get(jobs::get).patch(jobs::patch).delete(jobs::delete),
        )
        // local management endpoints
        .route("/k2d/kubeconfig", get(system::kubeconfig))
        .route("/k2d/system/diagnostics", get(system::diagnostics))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::validate_namespace,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::authenticate,
        ));

    Router::new()
        .route("/version", get(handlers::meta::version))
        .route("/healthz", get(handlers::meta::healthz))
        .merge(protected)
        .fallback(handlers::meta::unsupported)
        .method_not_allowed_fallback(handlers::meta::unsupported)
        .layer(axum::middleware::from_fn(middleware::log_request))
        .layer(axum::middleware::from_fn(middleware::request_id))
        .with_state(state)
}

#[cfg(test)]
mod test {
    use super::*;

    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use clap::Parser;
    use http_body_util::BodyExt;
    use k2d_store::{DiskStore, StoreBackend};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const TOKEN: &str = "test-token";
    const TABLE_ACCEPT: &str = "application/json;as=Table;v=v1;g=meta.k8s.io";

    struct Harness {
        state: AppState,
        operations: mpsc::UnboundedReceiver<Operation>,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StoreBackend::Disk(DiskStore::new(dir.path().join("store"))));
        let docker = k2d_adapter::connect(Duration::from_secs(60)).unwrap();
        let adapter = Arc::new(EngineAdapter::new(
            docker,
            store,
            dir.path(),
            "127.0.0.1",
        ));
        let (operations_tx, operations_rx) = mpsc::unbounded_channel();
        let state = AppState {
            adapter,
            operations: operations_tx,
            openapi: Arc::new(OpenApiCache::new()),
            config: Arc::new(Config::parse_from(["k2d"])),
            token: TOKEN.to_string(),
            token_digest: k2d_core::token::digest(TOKEN),
            advertised_address: "127.0.0.1".to_string(),
            port: 6443,
        };
        Harness {
            state,
            operations: operations_rx,
            _dir: dir,
        }
    }

    fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        builder
            .body(match body {
                Some(value) => Body::from(value.to_string()),
                None => Body::empty(),
            })
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_version_and_healthz_are_public() {
        let harness = harness();
        let app = router(harness.state.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/version").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["major"], "1");

        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let harness = harness();
        let app = router(harness.state.clone());

        let response = app
            .oneshot(Request::get("/k2d/kubeconfig").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"invalid secret\n");
    }

    #[tokio::test]
    async fn test_wrong_token_is_unauthorized() {
        let harness = harness();
        let app = router(harness.state.clone());

        let response = app
            .oneshot(
                Request::get("/api/v1/configmaps")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unsupported_route_is_not_found() {
        let harness = harness();
        let app = router(harness.state.clone());

        let response = app
            .clone()
            .oneshot(request("GET", "/api/v1/componentstatuses", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // unsupported verb on a known path is a 404, not a 405
        let response = app
            .oneshot(request("DELETE", "/api/v1/nodes", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_discovery_lists_core_resources() {
        let harness = harness();
        let app = router(harness.state.clone());

        let response = app.oneshot(request("GET", "/api/v1", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let names: Vec<&str> = body["resources"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"pods"));
        assert!(names.contains(&"persistentvolumeclaims"));
        assert!(!names.contains(&"statefulsets"));
    }

    #[tokio::test]
    async fn test_dry_run_does_not_enqueue() {
        let mut harness = harness();
        let app = router(harness.state.clone());

        let response = app
            .oneshot(request(
                "POST",
                "/api/v1/namespaces/default/configmaps?dryRun=All",
                Some(json!({
                    "apiVersion": "v1",
                    "kind": "ConfigMap",
                    "metadata": {"name": "cfg"},
                    "data": {"k": "v"}
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["metadata"]["namespace"], "default");
        assert!(harness.operations.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_create_enqueues_operation() {
        let mut harness = harness();
        let app = router(harness.state.clone());

        let response = app
            .oneshot(request(
                "POST",
                "/api/v1/namespaces/default/configmaps",
                Some(json!({
                    "apiVersion": "v1",
                    "kind": "ConfigMap",
                    "metadata": {"name": "cfg"},
                    "data": {"k": "v"}
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let operation = harness.operations.try_recv().unwrap();
        assert_eq!(operation.payload.kind(), "ConfigMap");
        assert_eq!(
            operation.priority,
            k2d_core::operation::OperationPriority::High
        );
        assert!(!operation.request_id.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_namespace_returns_status_not_found() {
        let harness = harness();
        let app = router(harness.state.clone());

        let response = app
            .oneshot(request("GET", "/api/v1/namespaces/team/configmaps", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert_eq!(body["kind"], "Status");
        assert_eq!(body["status"], "Failure");
        assert_eq!(body["reason"], "NotFound");
    }

    #[tokio::test]
    async fn test_list_content_negotiation() {
        let harness = harness();
        let app = router(harness.state.clone());

        harness
            .state
            .adapter
            .create_config_map(
                serde_json::from_value(json!({
                    "apiVersion": "v1",
                    "kind": "ConfigMap",
                    "metadata": {"name": "cfg", "namespace": "default"},
                    "data": {"k": "v"}
                }))
                .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request("GET", "/api/v1/configmaps", None))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["kind"], "ConfigMapList");
        assert_eq!(body["items"].as_array().unwrap().len(), 1);

        let mut table_request = request("GET", "/api/v1/configmaps", None);
        table_request
            .headers_mut()
            .insert(header::ACCEPT, TABLE_ACCEPT.parse().unwrap());
        let response = app.oneshot(table_request).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["kind"], "Table");
        assert_eq!(body["apiVersion"], "meta.k8s.io/v1");
        assert_eq!(body["rows"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_patch_merges_and_enqueues() {
        let mut harness = harness();
        let app = router(harness.state.clone());

        harness
            .state
            .adapter
            .create_config_map(
                serde_json::from_value(json!({
                    "apiVersion": "v1",
                    "kind": "ConfigMap",
                    "metadata": {"name": "cfg", "namespace": "default"},
                    "data": {"k": "v", "stay": "1"}
                }))
                .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request(
                "PATCH",
                "/api/v1/namespaces/default/configmaps/cfg",
                Some(json!({"data": {"k": "v2"}})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["data"]["k"], "v2");
        assert_eq!(body["data"]["stay"], "1");
        assert_eq!(harness.operations.try_recv().unwrap().payload.kind(), "ConfigMap");
    }

    #[tokio::test]
    async fn test_patch_missing_object_is_not_found() {
        let harness = harness();
        let app = router(harness.state.clone());

        let response = app
            .oneshot(request(
                "PATCH",
                "/api/v1/namespaces/default/configmaps/missing",
                Some(json!({"data": {"k": "v"}})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_openapi_etag_is_stable() {
        let harness = harness();
        let app = router(harness.state.clone());

        let first = app
            .clone()
            .oneshot(request("GET", "/openapi/v2", None))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first_etag = first.headers().get(header::ETAG).unwrap().clone();
        assert_eq!(first.headers().get(header::VARY).unwrap(), "Accept");

        let second = app
            .clone()
            .oneshot(request("GET", "/openapi/v2", None))
            .await
            .unwrap();
        assert_eq!(second.headers().get(header::ETAG).unwrap(), &first_etag);

        harness.state.openapi.update_spec();
        let third = app
            .oneshot(request("GET", "/openapi/v2", None))
            .await
            .unwrap();
        assert_ne!(third.headers().get(header::ETAG).unwrap(), &first_etag);
    }

    #[tokio::test]
    async fn test_openapi_gzip() {
        let harness = harness();
        let app = router(harness.state.clone());

        let mut gzip_request = request("GET", "/openapi/v2", None);
        gzip_request
            .headers_mut()
            .insert(header::ACCEPT_ENCODING, "gzip".parse().unwrap());
        let response = app.oneshot(gzip_request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        assert!(response.headers().get(header::ETAG).is_some());

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        // gzip magic bytes
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_secret_put_times_out_when_absent() {
        let harness = harness();
        let app = router(harness.state.clone());

        let response = app
            .oneshot(request(
                "PUT",
                "/api/v1/namespaces/default/secrets/missing",
                Some(json!({
                    "apiVersion": "v1",
                    "kind": "Secret",
                    "metadata": {"name": "missing"},
                    "stringData": {"k": "v"}
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_secret_put_overwrites_existing() {
        let harness = harness();
        let app = router(harness.state.clone());

        harness
            .state
            .adapter
            .create_secret(
                serde_json::from_value(json!({
                    "apiVersion": "v1",
                    "kind": "Secret",
                    "metadata": {"name": "s", "namespace": "default"},
                    "stringData": {"k": "old"}
                }))
                .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(request(
                "PUT",
                "/api/v1/namespaces/default/secrets/s",
                Some(json!({
                    "apiVersion": "v1",
                    "kind": "Secret",
                    "metadata": {"name": "s"},
                    "stringData": {"k": "new"}
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["stringData"]["k"], "new");
        // the overwrite bumped the stored resource version past the create
        assert_eq!(body["metadata"]["resourceVersion"], "2");
    }

    #[tokio::test]
    async fn test_request_id_echoed() {
        let harness = harness();
        let app = router(harness.state.clone());

        let response = app
            .clone()
            .oneshot(request("GET", "/healthz", None))
            .await
            .unwrap();
        assert!(response.headers().get("x-request-id").is_some());

        let mut tagged = request("GET", "/healthz", None);
        tagged
            .headers_mut()
            .insert("x-request-id", "req-42".parse().unwrap());
        let response = app.oneshot(tagged).await.unwrap();
        assert_eq!(response.headers().get("x-request-id").unwrap(), "req-42");
    }
}
