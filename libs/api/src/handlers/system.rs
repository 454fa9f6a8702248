//! Local management endpoints under `/k2d/`, gated by the bearer token.

use crate::AppState;
use crate::error::{ApiError, Result};

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use k2d_core::version::VERSION;
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KubeConfig {
    api_version: &'static str,
    kind: &'static str,
    clusters: Vec<NamedCluster>,
    contexts: Vec<NamedContext>,
    #[serde(rename = "current-context")]
    current_context: String,
    users: Vec<NamedUser>,
}

#[derive(Serialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(Serialize)]
struct Cluster {
    #[serde(rename = "certificate-authority-data")]
    certificate_authority_data: String,
    server: String,
}

#[derive(Serialize)]
struct NamedContext {
    name: String,
    context: Context,
}

#[derive(Serialize)]
struct Context {
    cluster: String,
    user: String,
}

#[derive(Serialize)]
struct NamedUser {
    name: String,
    user: User,
}

#[derive(Serialize)]
struct User {
    token: String,
}

/// Render a client configuration wiring the generated CA, the advertised
/// server URL and the bearer token.
pub async fn kubeconfig(State(state): State<AppState>) -> Result<Response> {
    let ca_path = state.config.data_path.join("ssl").join("ca.pem");
    let ca = tokio::fs::read(&ca_path)
        .await
        .map_err(|e| ApiError::internal("failed to read CA certificate", e))?;

    let config = KubeConfig {
        api_version: "v1",
        kind: "Config",
        clusters: vec![NamedCluster {
            name: "k2d".to_string(),
            cluster: Cluster {
                certificate_authority_data: STANDARD.encode(&ca),
                server: format!("https://{}:{}", state.advertised_address, state.port),
            },
        }],
        contexts: vec![NamedContext {
            name: "k2d".to_string(),
            context: Context {
                cluster: "k2d".to_string(),
                user: "k2d-admin".to_string(),
            },
        }],
        current_context: "k2d".to_string(),
        users: vec![NamedUser {
            name: "k2d-admin".to_string(),
            user: User {
                token: state.token.clone(),
            },
        }],
    };

    let yaml = serde_yaml::to_string(&config)
        .map_err(|e| ApiError::internal("failed to render kubeconfig", e))?;

    Ok(Response::builder()
        .header(header::CONTENT_TYPE, "application/yaml")
        .body(yaml.into())
        .expect("kubeconfig response"))
}

/// Build information, host platform, redacted configuration and an engine
/// snapshot, for support bundles.
pub async fn diagnostics(State(state): State<AppState>) -> Result<Json<Value>> {
    let info = state
        .adapter
        .docker()
        .info()
        .await
        .map_err(|e| ApiError::internal("failed to read engine info", e))?;
    let version = state
        .adapter
        .docker()
        .version()
        .await
        .map_err(|e| ApiError::internal("failed to read engine version", e))?;

    Ok(Json(json!({
        "version": VERSION,
        "platform": {
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        },
        "configuration": state.config.redacted(),
        "engine": {
            "info": serde_json::to_value(&info).unwrap_or_default(),
            "version": serde_json::to_value(&version).unwrap_or_default(),
        },
    })))
}
