mod common;

use common::*;
use docker_registry_browser::config::{Credentials, RegistryEndpoint, RetryConfig};
use docker_registry_browser::error::RegistryError;
use docker_registry_browser::registry::{AuthManager, AuthMode, RetryingTransport, TransportFault};
use reqwest::header::HeaderMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn transport(backend: &Arc<ScriptedBackend>, credentials: Option<Credentials>, retry: RetryConfig) -> RetryingTransport {
    let endpoint = RegistryEndpoint::parse(REGISTRY_URL).unwrap();
    let auth = Arc::new(AuthManager::new(credentials, backend.clone(), retry.request_timeout));
    RetryingTransport::new(endpoint, backend.clone(), auth, retry)
}

fn catalog_ok() -> Reply {
    json_reply(200, json!({ "repositories": ["app"] }))
}

#[tokio::test]
async fn server_errors_are_retried_until_the_budget_runs_out() {
    let backend = ScriptedBackend::new();
    backend.on("GET /v2/_catalog", status_reply(500));
    let transport = transport(&backend, None, fast_retry(3));

    let err = transport.get("/v2/_catalog", HeaderMap::new()).await.unwrap_err();

    assert!(matches!(err, RegistryError::Connection(_)), "got {err:?}");
    assert!(err.is_retryable());
    assert_eq!(backend.calls("/v2/_catalog"), 4);
}

#[tokio::test]
async fn transient_failures_recover() {
    let backend = ScriptedBackend::new();
    backend
        .on("GET /v2/_catalog", status_reply(503))
        .on("GET /v2/_catalog", Reply::Fail(TransportFault::Connection("reset by peer".into())))
        .on("GET /v2/_catalog", catalog_ok());
    let transport = transport(&backend, None, fast_retry(3));

    let response = transport.get("/v2/_catalog", HeaderMap::new()).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(backend.calls("/v2/_catalog"), 3);
}

#[tokio::test]
async fn not_found_is_never_retried() {
    let backend = ScriptedBackend::new();
    backend.on(
        "GET /v2/ghost/tags/list",
        json_reply(404, json!({"errors": [{"code": "NAME_UNKNOWN", "message": "repository name not known to registry"}]})),
    );
    let transport = transport(&backend, None, fast_retry(3));

    let err = transport.get("/v2/ghost/tags/list", HeaderMap::new()).await.unwrap_err();

    assert!(matches!(err, RegistryError::NotFound(_)), "got {err:?}");
    assert_eq!(err.user_message(), "repository/tag not found");
    assert_eq!(backend.calls("/v2/ghost/tags/list"), 1);
}

#[tokio::test]
async fn other_client_errors_are_terminal_and_keep_the_body() {
    let backend = ScriptedBackend::new();
    let body = json!({"errors": [{"code": "DENIED", "message": "requested access to the resource is denied"}]});
    backend.on("GET /v2/_catalog", json_reply(403, body.clone()));
    let transport = transport(&backend, None, fast_retry(3));

    let err = transport.get("/v2/_catalog", HeaderMap::new()).await.unwrap_err();

    match &err {
        RegistryError::Registry { status, body: kept, .. } => {
            assert_eq!(*status, 403);
            assert_eq!(kept, &body.to_string());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.user_message(), "access denied by the registry");
    assert_eq!(backend.calls("/v2/_catalog"), 1);
}

#[tokio::test]
async fn timeouts_surface_after_retries() {
    let backend = ScriptedBackend::new();
    backend.on("GET /v2/_catalog", Reply::Hang);
    let retry = fast_retry(1).with_request_timeout(Duration::from_millis(50));
    let transport = transport(&backend, None, retry);

    let err = transport.get("/v2/_catalog", HeaderMap::new()).await.unwrap_err();

    assert!(matches!(err, RegistryError::Timeout(_)), "got {err:?}");
    assert_eq!(backend.calls("/v2/_catalog"), 2);
}

#[tokio::test]
async fn bearer_challenge_triggers_one_token_exchange() {
    let backend = ScriptedBackend::new();
    backend
        .on("GET /v2/_catalog", bearer_challenge("registry:catalog:*"))
        .on("GET /v2/_catalog", catalog_ok())
        .on("GET /token", token_reply("tok-1"));
    let transport = transport(&backend, None, fast_retry(0));

    let response = transport.get("/v2/_catalog", HeaderMap::new()).await.unwrap();
    assert_eq!(response.status, 200);

    // The token is reused without another exchange.
    transport.get("/v2/_catalog", HeaderMap::new()).await.unwrap();

    assert_eq!(backend.calls("/token"), 1);
    assert_eq!(backend.calls("/v2/_catalog"), 3);
    assert_eq!(transport.auth().mode().await, AuthMode::Bearer);

    let catalog: Vec<_> = backend
        .requests()
        .into_iter()
        .filter(|r| r.path == "/v2/_catalog")
        .map(|r| r.authorization)
        .collect();
    assert_eq!(catalog[0], None);
    assert_eq!(catalog[1].as_deref(), Some("Bearer tok-1"));
    assert_eq!(catalog[2].as_deref(), Some("Bearer tok-1"));

    let token_request = backend.requests().into_iter().find(|r| r.path == "/token").unwrap();
    let query = token_request.query.unwrap();
    assert!(query.contains("service=registry.test"));
    assert!(query.contains("scope="));
}

#[tokio::test]
async fn second_unauthorized_fails_without_looping() {
    let backend = ScriptedBackend::new();
    backend
        .on("GET /v2/_catalog", bearer_challenge("registry:catalog:*"))
        .on("GET /token", token_reply("rejected-token"));
    let transport = transport(&backend, None, fast_retry(3));

    let err = transport.get("/v2/_catalog", HeaderMap::new()).await.unwrap_err();

    assert!(matches!(err, RegistryError::Auth(_)), "got {err:?}");
    assert_eq!(err.user_message(), "registry authentication failed");
    assert_eq!(backend.calls("/v2/_catalog"), 2);
    assert_eq!(backend.calls("/token"), 1);
}

#[tokio::test]
async fn token_endpoint_failure_is_an_auth_error() {
    let backend = ScriptedBackend::new();
    backend
        .on("GET /v2/_catalog", bearer_challenge("registry:catalog:*"))
        .on("GET /token", status_reply(500));
    let transport = transport(&backend, None, fast_retry(3));

    let err = transport.get("/v2/_catalog", HeaderMap::new()).await.unwrap_err();

    assert!(matches!(err, RegistryError::Auth(_)), "got {err:?}");
    assert_eq!(backend.calls("/v2/_catalog"), 1);
}

#[tokio::test]
async fn credentials_go_to_the_token_service() {
    let backend = ScriptedBackend::new();
    backend
        .on("GET /v2/_catalog", bearer_challenge("registry:catalog:*"))
        .on("GET /v2/_catalog", catalog_ok())
        .on("GET /token", token_reply("tok-2"));
    let credentials = Credentials::new("aladdin", "opensesame");
    let transport = transport(&backend, Some(credentials), fast_retry(0));

    transport.get("/v2/_catalog", HeaderMap::new()).await.unwrap();

    let token_request = backend.requests().into_iter().find(|r| r.path == "/token").unwrap();
    assert_eq!(
        token_request.authorization.as_deref(),
        Some("Basic YWxhZGRpbjpvcGVuc2VzYW1l")
    );
}

#[tokio::test]
async fn basic_challenge_without_credentials_fails() {
    let backend = ScriptedBackend::new();
    backend.on(
        "GET /v2/_catalog",
        Reply::Respond(response(401, "", &[("www-authenticate", r#"Basic realm="registry""#)])),
    );
    let transport = transport(&backend, None, fast_retry(3));

    let err = transport.get("/v2/_catalog", HeaderMap::new()).await.unwrap_err();

    assert!(matches!(err, RegistryError::Auth(_)), "got {err:?}");
    assert_eq!(backend.calls("/v2/_catalog"), 1);
}

#[tokio::test]
async fn configured_credentials_are_sent_as_basic_up_front() {
    let backend = ScriptedBackend::new();
    backend.on("GET /v2/_catalog", catalog_ok());
    let transport = transport(&backend, Some(Credentials::new("aladdin", "opensesame")), fast_retry(0));

    transport.get("/v2/_catalog", HeaderMap::new()).await.unwrap();

    assert_eq!(transport.auth().mode().await, AuthMode::Basic);
    let sent = backend.requests();
    assert_eq!(sent[0].authorization.as_deref(), Some("Basic YWxhZGRpbjpvcGVuc2VzYW1l"));
}

#[tokio::test]
async fn concurrent_challenges_share_one_token_exchange() {
    let backend = ScriptedBackend::new();
    backend
        .challenge_anonymous(challenge_response("registry:catalog:*"))
        .on("GET /v2/_catalog", catalog_ok())
        .on(
            "GET /token",
            Reply::Delayed(
                Duration::from_millis(100),
                response(200, &json!({ "token": "shared", "expires_in": 300 }).to_string(), &[]),
            ),
        );
    let transport = transport(&backend, None, fast_retry(0));

    let results = futures::future::join_all(
        (0..32).map(|_| transport.get("/v2/_catalog", HeaderMap::new())),
    )
    .await;

    assert!(results.iter().all(|r| matches!(r, Ok(ok) if ok.status == 200)));
    assert_eq!(backend.calls("/token"), 1);
    let authorized = backend
        .requests()
        .into_iter()
        .filter(|r| r.path == "/v2/_catalog" && r.authorization.is_some())
        .all(|r| r.authorization.as_deref() == Some("Bearer shared"));
    assert!(authorized);
}
