use axum::Json;
use axum::http::StatusCode;
use k2d_core::version::VersionInfo;

pub async fn version() -> Json<VersionInfo> {
    Json(VersionInfo::current())
}

pub async fn healthz() -> &'static str {
    "ok"
}

/// Catch-all for verbs and resources outside the supported subset.
pub async fn unsupported() -> StatusCode {
    StatusCode::NOT_FOUND
}
