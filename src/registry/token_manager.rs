//! Credential management for one registry endpoint
//!
//! [`AuthManager`] decides which `Authorization` header the next request
//! carries: nothing, static basic credentials, or a bearer token obtained
//! from the realm named by the last `WWW-Authenticate` challenge. Tokens are
//! cached per realm/service/scope and exchanged at most once concurrently.

use crate::common::singleflight::SingleFlight;
use crate::config::Credentials;
use crate::error::handlers::HttpErrorHandler;
use crate::error::{RegistryError, Result};
use crate::registry::auth::{AuthChallenge, AuthScheme, BearerToken, TokenResponse};
use crate::registry::transport::{HttpBackend, HttpRequest};
use base64::Engine;
use chrono::Utc;
use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

/// How requests are currently being authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Anonymous,
    Basic,
    Bearer,
}

#[derive(Default)]
struct AuthState {
    challenge: Option<AuthChallenge>,
    tokens: HashMap<String, BearerToken>,
}

pub struct AuthManager {
    credentials: Option<Credentials>,
    backend: Arc<dyn HttpBackend>,
    exchange_timeout: Duration,
    state: Arc<RwLock<AuthState>>,
    exchanges: SingleFlight<BearerToken>,
}

impl AuthManager {
    pub fn new(
        credentials: Option<Credentials>,
        backend: Arc<dyn HttpBackend>,
        exchange_timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            backend,
            exchange_timeout,
            state: Arc::new(RwLock::new(AuthState::default())),
            exchanges: SingleFlight::new(),
        }
    }

    pub async fn mode(&self) -> AuthMode {
        match self.state.read().await.challenge.as_ref().map(|c| c.scheme) {
            Some(AuthScheme::Bearer) => AuthMode::Bearer,
            Some(AuthScheme::Basic) => AuthMode::Basic,
            None if self.credentials.is_some() => AuthMode::Basic,
            None => AuthMode::Anonymous,
        }
    }

    /// Header value for the next request, or `None` to go unauthenticated.
    pub async fn credentials(&self) -> Result<Option<String>> {
        let challenge = self.state.read().await.challenge.clone();
        match challenge {
            Some(challenge) if challenge.scheme == AuthScheme::Bearer => {
                self.bearer_for(&challenge, None).await.map(Some)
            }
            Some(_) => self.basic_header().map(Some).ok_or_else(|| {
                RegistryError::Auth("registry requires basic authentication but no credentials are configured".to_string())
            }),
            None => Ok(self.basic_header()),
        }
    }

    /// Remember the latest challenge so later `credentials()` calls answer it.
    pub async fn record_challenge(&self, challenge: AuthChallenge) {
        debug!(realm = %challenge.realm, scope = ?challenge.scope, "Recorded auth challenge");
        self.state.write().await.challenge = Some(challenge);
    }

    /// Answer a 401. `rejected` is the header value the registry just refused;
    /// it is never handed out again.
    pub async fn reauthenticate(
        &self,
        challenge: AuthChallenge,
        rejected: Option<&str>,
    ) -> Result<Option<String>> {
        self.record_challenge(challenge.clone()).await;
        match challenge.scheme {
            AuthScheme::Bearer => self.bearer_for(&challenge, rejected).await.map(Some),
            AuthScheme::Basic => match self.basic_header() {
                Some(header) if rejected == Some(header.as_str()) => Err(RegistryError::Auth(
                    "registry rejected the configured credentials".to_string(),
                )),
                Some(header) => Ok(Some(header)),
                None => Err(RegistryError::Auth(
                    "registry requires credentials but none are configured".to_string(),
                )),
            },
        }
    }

    fn basic_header(&self) -> Option<String> {
        self.credentials.as_ref().map(basic_auth_value)
    }

    async fn bearer_for(&self, challenge: &AuthChallenge, rejected: Option<&str>) -> Result<String> {
        let key = challenge.token_key();
        {
            let state = self.state.read().await;
            if let Some(token) = state.tokens.get(&key) {
                let header = token.header_value();
                if token.is_usable_at(Utc::now()) && rejected != Some(header.as_str()) {
                    return Ok(header);
                }
            }
        }

        let token = self
            .exchanges
            .run(&key, || {
                let backend = Arc::clone(&self.backend);
                let state = Arc::clone(&self.state);
                let credentials = self.credentials.clone();
                let challenge = challenge.clone();
                let timeout = self.exchange_timeout;
                let key = key.clone();
                async move {
                    let token =
                        exchange_token(backend.as_ref(), &challenge, credentials.as_ref(), timeout).await?;
                    let now = Utc::now();
                    let mut state = state.write().await;
                    state.tokens.retain(|_, t| t.is_usable_at(now));
                    state.tokens.insert(key, token.clone());
                    Ok(token)
                }
            })
            .await?;

        Ok(token.header_value())
    }
}

fn basic_auth_value(credentials: &Credentials) -> String {
    let raw = format!("{}:{}", credentials.username, credentials.password);
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(raw)
    )
}

/// `GET <realm>?service=...&scope=...`, with basic auth when credentials exist.
async fn exchange_token(
    backend: &dyn HttpBackend,
    challenge: &AuthChallenge,
    credentials: Option<&Credentials>,
    timeout: Duration,
) -> Result<BearerToken> {
    let mut url = Url::parse(&challenge.realm)
        .map_err(|e| RegistryError::Auth(format!("invalid token realm '{}': {}", challenge.realm, e)))?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(service) = &challenge.service {
            query.append_pair("service", service);
        }
        if let Some(scope) = &challenge.scope {
            query.append_pair("scope", scope);
        }
    }

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Some(credentials) = credentials {
        let value = HeaderValue::from_str(&basic_auth_value(credentials))
            .map_err(|e| RegistryError::Auth(format!("invalid credentials: {}", e)))?;
        headers.insert(AUTHORIZATION, value);
    }

    info!(realm = %challenge.realm, scope = ?challenge.scope, "Requesting registry token");

    let request = HttpRequest {
        method: Method::GET,
        url,
        headers,
    };
    let response = match tokio::time::timeout(timeout, backend.execute(request)).await {
        Ok(Ok(response)) => response,
        Ok(Err(fault)) => {
            return Err(RegistryError::Auth(format!("token request failed: {}", fault)));
        }
        Err(_) => {
            return Err(RegistryError::Auth(format!(
                "token request timed out after {}s",
                timeout.as_secs()
            )));
        }
    };

    if !response.is_success() {
        let body = response.text();
        let detail = HttpErrorHandler::summarize_body(&body).unwrap_or(body);
        return Err(RegistryError::Auth(format!(
            "token endpoint answered HTTP {}: {}",
            response.status, detail
        )));
    }

    let parsed: TokenResponse = serde_json::from_slice(&response.body)
        .map_err(|e| RegistryError::Auth(format!("unreadable token response: {}", e)))?;
    parsed.into_bearer_token(Utc::now())
}
