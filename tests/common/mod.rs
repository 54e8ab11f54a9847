//! Shared fixtures for integration tests: a scripted HTTP backend that
//! counts calls, and an in-memory registry provider.

#![allow(dead_code)]

use async_trait::async_trait;
use docker_registry_browser::cache::TtlCache;
use docker_registry_browser::config::{CacheConfig, ClientConfig, Credentials, RegistryEndpoint, RetryConfig};
use docker_registry_browser::error::{RegistryError, Result};
use docker_registry_browser::image::manifest::DOCKER_MANIFEST_V2;
use docker_registry_browser::image::Manifest;
use docker_registry_browser::registry::{HttpBackend, HttpRequest, HttpResponse, RegistryClient, TransportFault};
use docker_registry_browser::{RegistryProvider, RepositoryInfo, TagInfo};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const REGISTRY_URL: &str = "http://registry.test";
pub const TOKEN_REALM: &str = "http://auth.test/token";

/// What the backend does for one request
#[derive(Clone)]
pub enum Reply {
    Respond(HttpResponse),
    Fail(TransportFault),
    /// Never answers within any sane request timeout
    Hang,
    /// Answers after a pause
    Delayed(Duration, HttpResponse),
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
}

/// Answers requests from per-route scripts. Each route replays its replies
/// in order and then keeps repeating the last one.
///
/// Routes are `"<METHOD> <path>"` or `"<METHOD> <path>?<query>"`; a route with
/// a query wins over a bare path. Unscripted requests get a 404.
#[derive(Default)]
pub struct ScriptedBackend {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    log: Mutex<Vec<RecordedRequest>>,
    anonymous_reply: Mutex<Option<HttpResponse>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, route: &str, reply: Reply) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(route.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Answer every request without an `Authorization` header with `reply`,
    /// except calls to the token realm.
    pub fn challenge_anonymous(&self, reply: HttpResponse) -> &Self {
        *self.anonymous_reply.lock().unwrap() = Some(reply);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().unwrap().clone()
    }

    /// Requests whose path equals `path`, any method.
    pub fn calls(&self, path: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|r| r.path == path).count()
    }

    pub fn total_calls(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    fn next_reply(&self, method: &str, path: &str, query: Option<&str>) -> Option<Reply> {
        let mut routes = self.routes.lock().unwrap();
        let with_query = query.map(|q| format!("{} {}?{}", method, path, q));
        let bare = format!("{} {}", method, path);
        let key = with_query
            .filter(|k| routes.contains_key(k))
            .unwrap_or(bare);
        let script = routes.get_mut(&key)?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }
}

#[async_trait]
impl HttpBackend for ScriptedBackend {
    async fn execute(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportFault> {
        let method = request.method.to_string();
        let path = request.url.path().to_string();
        let query = request.url.query().map(str::to_string);
        let authorization = request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let anonymous = authorization.is_none();
        self.log.lock().unwrap().push(RecordedRequest {
            method: method.clone(),
            path: path.clone(),
            query: query.clone(),
            authorization,
        });

        if anonymous && request.url.as_str().split('?').next() != Some(TOKEN_REALM) {
            if let Some(challenge) = self.anonymous_reply.lock().unwrap().clone() {
                return Ok(challenge);
            }
        }

        match self.next_reply(&method, &path, query.as_deref()) {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(fault)) => Err(fault),
            Some(Reply::Delayed(pause, response)) => {
                tokio::time::sleep(pause).await;
                Ok(response)
            }
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TransportFault::Timeout("hung".to_string()))
            }
            None => Ok(response(404, r#"{"errors":[{"code":"NAME_UNKNOWN","message":"not scripted"}]}"#, &[])),
        }
    }
}

pub fn response(status: u16, body: &str, headers: &[(&str, &str)]) -> HttpResponse {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    HttpResponse {
        status,
        headers: map,
        body: body.as_bytes().to_vec(),
    }
}

pub fn json_reply(status: u16, body: Value) -> Reply {
    Reply::Respond(response(status, &body.to_string(), &[("content-type", "application/json")]))
}

pub fn json_reply_with(status: u16, body: Value, headers: &[(&str, &str)]) -> Reply {
    let mut all = vec![("content-type", "application/json")];
    all.extend_from_slice(headers);
    Reply::Respond(response(status, &body.to_string(), &all))
}

pub fn status_reply(status: u16) -> Reply {
    Reply::Respond(response(status, "", &[]))
}

pub fn bearer_challenge(scope: &str) -> Reply {
    Reply::Respond(challenge_response(scope))
}

pub fn challenge_response(scope: &str) -> HttpResponse {
    let challenge = format!(
        r#"Bearer realm="{}",service="registry.test",scope="{}""#,
        TOKEN_REALM, scope
    );
    response(
        401,
        r#"{"errors":[{"code":"UNAUTHORIZED","message":"authentication required"}]}"#,
        &[("www-authenticate", challenge.as_str())],
    )
}

pub fn token_reply(token: &str) -> Reply {
    json_reply(200, json!({ "token": token, "expires_in": 300 }))
}

/// Schema2 manifest with the given layer sizes and a config blob digest.
pub fn image_manifest(config_digest: &str, layer_sizes: &[u64]) -> Value {
    let layers: Vec<Value> = layer_sizes
        .iter()
        .enumerate()
        .map(|(i, size)| {
            json!({
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "digest": format!("sha256:{:064x}", i + 1),
                "size": size,
            })
        })
        .collect();
    json!({
        "schemaVersion": 2,
        "mediaType": DOCKER_MANIFEST_V2,
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "digest": config_digest,
            "size": 1469,
        },
        "layers": layers,
    })
}

pub fn manifest_reply(manifest: Value, digest: &str) -> Reply {
    Reply::Respond(response(
        200,
        &manifest.to_string(),
        &[("content-type", DOCKER_MANIFEST_V2), ("docker-content-digest", digest)],
    ))
}

pub fn config_blob_reply(created: &str) -> Reply {
    json_reply(200, json!({ "created": created, "architecture": "amd64", "os": "linux" }))
}

/// Script one tag of `repository` end to end: manifest plus config blob.
pub fn script_tag(
    backend: &ScriptedBackend,
    repository: &str,
    tag: &str,
    digest: &str,
    layer_sizes: &[u64],
    created: &str,
) {
    let config_digest = format!("sha256:cfg{}", digest.trim_start_matches("sha256:"));
    backend.on(
        &format!("GET /v2/{}/manifests/{}", repository, tag),
        manifest_reply(image_manifest(&config_digest, layer_sizes), digest),
    );
    backend.on(
        &format!("GET /v2/{}/blobs/{}", repository, config_digest),
        config_blob_reply(created),
    );
}

/// Retry policy that keeps tests fast.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::default()
        .with_max_retries(max_retries)
        .with_base_delay(Duration::from_millis(1))
        .with_request_timeout(Duration::from_secs(5))
}

pub fn client_config(dir: &TempDir, credentials: Option<Credentials>) -> ClientConfig {
    let mut endpoint = RegistryEndpoint::parse(REGISTRY_URL).unwrap();
    if let Some(credentials) = credentials {
        endpoint = endpoint.with_credentials(credentials);
    }
    ClientConfig::new(endpoint, CacheConfig::new(dir.path().join("cache.db"))).with_retry(fast_retry(3))
}

pub async fn build_client(config: ClientConfig, backend: Arc<ScriptedBackend>) -> RegistryClient {
    let cache = TtlCache::open(&config.cache.path).await.unwrap();
    RegistryClient::with_backend(config, backend, cache)
}

/// In-memory registry for exercising the query layer without HTTP
#[derive(Default)]
pub struct InMemoryProvider {
    pub repositories: Vec<RepositoryInfo>,
    pub tags: HashMap<String, Vec<TagInfo>>,
    pub failure: Option<RegistryError>,
}

impl InMemoryProvider {
    pub fn with_repositories(names: &[(&str, usize)]) -> Self {
        Self {
            repositories: names
                .iter()
                .map(|(name, tag_count)| RepositoryInfo {
                    name: name.to_string(),
                    tag_count: *tag_count,
                    last_updated: None,
                })
                .collect(),
            ..Self::default()
        }
    }

    fn check(&self) -> Result<()> {
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RegistryProvider for InMemoryProvider {
    async fn list_repositories(&self) -> Result<Vec<RepositoryInfo>> {
        self.check()?;
        Ok(self.repositories.clone())
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<TagInfo>> {
        self.check()?;
        self.tags
            .get(repository)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("repository {}", repository)))
    }

    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        self.check()?;
        Err(RegistryError::NotFound(format!("{}:{}", repository, reference)))
    }
}
