//! Cached OpenAPI v2 self-description built from the resource registry.
//! The document is rendered once, served with a strong ETag (quoted
//! SHA-512), a Last-Modified stamp and optional gzip, and only rebuilt when
//! [`OpenApiCache::update_spec`] is invoked.

use crate::discovery::{ResourceDescriptor, registered_resources};

use std::io::Write;
use std::sync::RwLock;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use k2d_core::version::{KUBERNETES_VERSION, VERSION};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha512};

pub const PROTOBUF_MEDIA_TYPE: &str =
    "application/com.github.proto-openapi.spec.v2@v1.0+protobuf";

struct CachedSpec {
    json: Vec<u8>,
    gzip: Vec<u8>,
    etag: String,
    last_modified: String,
    revision: u64,
}

pub struct OpenApiCache {
    inner: RwLock<CachedSpec>,
}

impl OpenApiCache {
    pub fn new() -> Self {
        OpenApiCache {
            inner: RwLock::new(render(1)),
        }
    }

    /// Rebuild the cached document. The revision is part of the rendered
    /// bytes, so the ETag changes on every rebuild.
    pub fn update_spec(&self) {
        let mut inner = self.inner.write().expect("openapi cache lock poisoned");
        let revision = inner.revision + 1;
        *inner = render(revision);
    }

    pub fn etag(&self) -> String {
        self.inner
            .read()
            .expect("openapi cache lock poisoned")
            .etag
            .clone()
    }

    /// Serve the cached document with content negotiation. The protobuf
    /// media type is advertised but not rendered; a client that accepts
    /// nothing else receives 406.
    pub fn respond(&self, headers: &HeaderMap) -> Response {
        let accept = header_value(headers, header::ACCEPT);
        if accept.contains("protobuf") && !accept.contains("json") && !accept.contains("*/*") {
            return StatusCode::NOT_ACCEPTABLE.into_response();
        }

        let inner = self.inner.read().expect("openapi cache lock poisoned");

        if header_value(headers, header::IF_NONE_MATCH) == inner.etag {
            return Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .header(header::ETAG, &inner.etag)
                .header(header::VARY, "Accept")
                .body(Body::empty())
                .expect("static response")
                .into_response();
        }

        let gzip = header_value(headers, header::ACCEPT_ENCODING).contains("gzip");
        let body = if gzip {
            inner.gzip.clone()
        } else {
            inner.json.clone()
        };

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ETAG, &inner.etag)
            .header(header::LAST_MODIFIED, &inner.last_modified)
            .header(header::VARY, "Accept");
        if gzip {
            builder = builder.header(header::CONTENT_ENCODING, "gzip");
        }
        builder
            .body(Body::from(body))
            .expect("static response")
            .into_response()
    }
}

impl Default for OpenApiCache {
    fn default() -> Self {
        Self::new()
    }
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn render(revision: u64) -> CachedSpec {
    let document = build_document(revision);
    let json = serde_json::to_vec(&document).expect("openapi document serializes");

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).expect("gzip in-memory write");
    let gzip = encoder.finish().expect("gzip in-memory finish");

    let etag = format!("\"{}\"", hex_digest(&json));
    let last_modified = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

    CachedSpec {
        json,
        gzip,
        etag,
        last_modified,
        revision,
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn build_document(revision: u64) -> Value {
    let mut paths = Map::new();
    for descriptor in registered_resources().iter().filter(|d| d.enabled) {
        for (path, namespaced_form) in resource_paths(descriptor) {
            paths.insert(path, path_item(descriptor, namespaced_form));
        }
    }

    json!({
        "swagger": "2.0",
        "info": {
            "title": "k2d",
            "version": format!("v{KUBERNETES_VERSION}+k2d-{VERSION}-r{revision}"),
        },
        "paths": Value::Object(paths),
        "definitions": {},
    })
}

enum PathForm {
    Collection,
    Named,
}

fn resource_paths(descriptor: &ResourceDescriptor) -> Vec<(String, PathForm)> {
    let prefix = if descriptor.group.is_empty() {
        format!("/api/{}", descriptor.version)
    } else {
        format!("/apis/{}/{}", descriptor.group, descriptor.version)
    };
    let plural = descriptor.plural;

    let mut paths = vec![(format!("{prefix}/{plural}"), PathForm::Collection)];
    if descriptor.namespaced {
        paths.push((
            format!("{prefix}/namespaces/{{namespace}}/{plural}"),
            PathForm::Collection,
        ));
        paths.push((
            format!("{prefix}/namespaces/{{namespace}}/{plural}/{{name}}"),
            PathForm::Named,
        ));
    } else {
        paths.push((format!("{prefix}/{plural}/{{name}}"), PathForm::Named));
    }
    paths
}

fn path_item(descriptor: &ResourceDescriptor, form: PathForm) -> Value {
    let mut item = Map::new();
    let tag = descriptor.plural;
    let has = |verb: &str| descriptor.verbs.contains(&verb);

    match form {
        PathForm::Collection => {
            if has("list") {
                item.insert("get".to_string(), operation(tag, "list"));
            }
            if has("create") {
                item.insert("post".to_string(), operation(tag, "create"));
            }
        }
        PathForm::Named => {
            if has("get") {
                item.insert("get".to_string(), operation(tag, "read"));
            }
            if has("patch") {
                item.insert("patch".to_string(), operation(tag, "patch"));
            }
            if has("update") {
                item.insert("put".to_string(), operation(tag, "replace"));
            }
            if has("delete") {
                item.insert("delete".to_string(), operation(tag, "delete"));
            }
        }
    }
    Value::Object(item)
}

fn operation(tag: &str, action: &str) -> Value {
    json!({
        "tags": [tag],
        "operationId": format!("{action}-{tag}"),
        "consumes": ["application/json"],
        "produces": ["application/json"],
        "responses": {"200": {"description": "OK"}},
    })
}
