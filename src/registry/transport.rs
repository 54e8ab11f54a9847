//! HTTP transport for the Docker Registry v2 API
//!
//! [`HttpBackend`] is the raw request seam (reqwest in production, scripted
//! fakes in tests). [`RetryingTransport`] layers authentication, 401
//! re-authentication, bounded retries with backoff and error classification
//! on top of it.

use crate::config::{RegistryEndpoint, RetryConfig};
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{RegistryError, Result};
use crate::registry::auth::AuthChallenge;
use crate::registry::token_manager::AuthManager;
use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, WWW_AUTHENTICATE};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Failure below the HTTP layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportFault {
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Connection(String),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            RegistryError::Parse(format!("invalid JSON from registry: {}", e))
        })
    }

    /// `Content-Length`, as used by blob HEAD requests.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.trim().parse().ok())
    }
}

/// Raw HTTP seam
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportFault>;
}

/// Production backend on top of `reqwest`
pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new(endpoint: &RegistryEndpoint, timeout: Duration) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(endpoint.user_agent.clone());

        if !endpoint.verify_tls {
            warn!("TLS certificate verification is disabled");
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }

        let client = builder
            .build()
            .map_err(|e| RegistryError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn execute(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportFault> {
        let context = format!("{} {}", request.method, request.url.path());
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::classify(&e, &context))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| NetworkErrorHandler::classify(&e, &context))?;

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// A failed attempt that the retry budget may absorb
enum Transient {
    Fault(TransportFault),
    Server { status: u16, body: String },
}

pub struct RetryingTransport {
    endpoint: RegistryEndpoint,
    backend: Arc<dyn HttpBackend>,
    auth: Arc<AuthManager>,
    retry: RetryConfig,
}

impl RetryingTransport {
    pub fn new(
        endpoint: RegistryEndpoint,
        backend: Arc<dyn HttpBackend>,
        auth: Arc<AuthManager>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            endpoint,
            backend,
            auth,
            retry,
        }
    }

    pub fn endpoint(&self) -> &RegistryEndpoint {
        &self.endpoint
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    pub async fn get(&self, path: &str, headers: HeaderMap) -> Result<HttpResponse> {
        self.request(Method::GET, path, headers).await
    }

    pub async fn head(&self, path: &str) -> Result<HttpResponse> {
        self.request(Method::HEAD, path, HeaderMap::new()).await
    }

    /// Perform one logical request. `path` is either a registry path
    /// (`/v2/_catalog?n=100`) or an absolute URL from a `Link` header.
    ///
    /// - 401: record the challenge, re-authenticate, retry once (free of the budget)
    /// - 404: `NotFound`, never retried
    /// - 5xx, connection failure, timeout: retried up to `max_retries`
    /// - other non-2xx: terminal `Registry` error carrying the body
    pub async fn request(&self, method: Method, path: &str, headers: HeaderMap) -> Result<HttpResponse> {
        let url = self.endpoint.url_for(path)?;
        let context = format!("{} {}", method, url.path());

        let mut authorization = self.auth.credentials().await?;
        let mut reauthenticated = false;
        let mut retries: u32 = 0;

        loop {
            let mut request_headers = headers.clone();
            if let Some(value) = &authorization {
                let value = HeaderValue::from_str(value)
                    .map_err(|e| RegistryError::Auth(format!("unusable authorization header: {}", e)))?;
                request_headers.insert(AUTHORIZATION, value);
            }

            let request = HttpRequest {
                method: method.clone(),
                url: url.clone(),
                headers: request_headers,
            };

            debug!(request = %context, attempt = retries + 1, "Sending registry request");
            let outcome =
                tokio::time::timeout(self.retry.request_timeout, self.backend.execute(request)).await;

            let transient = match outcome {
                Err(_) => Transient::Fault(TransportFault::Timeout(format!(
                    "{} exceeded {}s",
                    context,
                    self.retry.request_timeout.as_secs_f64()
                ))),
                Ok(Err(fault)) => Transient::Fault(fault),
                Ok(Ok(response)) => match response.status {
                    200..=299 => return Ok(response),
                    401 if !reauthenticated => {
                        let challenge = response
                            .header(WWW_AUTHENTICATE.as_str())
                            .ok_or_else(|| {
                                RegistryError::Auth(format!("{} answered 401 without a challenge", context))
                            })
                            .and_then(AuthChallenge::parse)?;
                        debug!(
                            request = %context,
                            realm = %challenge.realm,
                            "Registry challenged, re-authenticating"
                        );
                        authorization = self
                            .auth
                            .reauthenticate(challenge, authorization.as_deref())
                            .await?;
                        reauthenticated = true;
                        continue;
                    }
                    500..=599 => Transient::Server {
                        status: response.status,
                        body: response.text(),
                    },
                    status => {
                        return Err(HttpErrorHandler::handle_registry_error(
                            status,
                            &response.text(),
                            &context,
                        ));
                    }
                },
            };

            if retries >= self.retry.max_retries {
                let attempts = retries + 1;
                return Err(match transient {
                    Transient::Fault(fault) => NetworkErrorHandler::exhausted(fault, attempts),
                    Transient::Server { status, body } => {
                        HttpErrorHandler::handle_server_error(status, &body, &context, attempts)
                    }
                });
            }

            let delay = self.retry.jittered_backoff(retries);
            let delay_ms = delay.as_millis() as u64;
            match &transient {
                Transient::Fault(fault) => {
                    warn!(request = %context, error = %fault, delay_ms, "Transient failure, retrying")
                }
                Transient::Server { status, .. } => {
                    warn!(request = %context, status, delay_ms, "Registry server error, retrying")
                }
            }
            tokio::time::sleep(delay).await;
            retries += 1;
        }
    }
}
