//! Configuration consumed by the registry client
//!
//! Values are built once at startup (see the CLI for the env/flag loading)
//! and stay immutable afterwards.

use crate::error::{RegistryError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = concat!("docker-registry-browser/", env!("CARGO_PKG_VERSION"));

/// Static registry credentials
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Target registry
#[derive(Debug, Clone)]
pub struct RegistryEndpoint {
    pub base_url: Url,
    pub credentials: Option<Credentials>,
    pub verify_tls: bool,
    pub user_agent: String,
}

impl RegistryEndpoint {
    /// Parse a registry address. `registry.local:5000` is read as
    /// `https://registry.local:5000`.
    pub fn parse(address: &str) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(RegistryError::Config("registry URL is empty".to_string()));
        }

        let with_scheme = if address.contains("://") {
            address.to_string()
        } else {
            format!("https://{}", address)
        };

        let mut base_url = Url::parse(&with_scheme)?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(RegistryError::Config(format!(
                "unsupported URL scheme '{}', expected http or https",
                base_url.scheme()
            )));
        }
        if base_url.host_str().is_none() {
            return Err(RegistryError::Config(format!("registry URL has no host: {}", address)));
        }

        // Paths are joined as `/v2/...` from the root.
        base_url.set_path("/");
        base_url.set_query(None);
        base_url.set_fragment(None);

        Ok(Self {
            base_url,
            credentials: None,
            verify_tls: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Attach credentials from optional parts, rejecting a username without a password.
    pub fn with_optional_credentials(
        self,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        match (username, password) {
            (Some(username), Some(password)) => Ok(self.with_credentials(Credentials::new(username, password))),
            (None, None) => Ok(self),
            (Some(_), None) => Err(RegistryError::Config(
                "a password is required when a username is given".to_string(),
            )),
            (None, Some(_)) => Err(RegistryError::Config(
                "a username is required when a password is given".to_string(),
            )),
        }
    }

    #[must_use]
    pub const fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    /// `host[:port]` as it appears in image references.
    pub fn registry_host(&self) -> String {
        let host = self.base_url.host_str().unwrap_or_default();
        match self.base_url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Resolve a registry path such as `/v2/_catalog` against the base URL.
    pub fn url_for(&self, path_and_query: &str) -> Result<Url> {
        Ok(self.base_url.join(path_and_query)?)
    }
}

/// Retry and timeout policy for registry requests
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay, as a fraction of the backoff
    pub jitter: f64,
    /// Deadline for a single attempt
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.25,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Backoff before retry number `attempt` (0-based) without jitter:
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff plus a random extra of at most `jitter * backoff`.
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if self.jitter <= 0.0 {
            return backoff;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        backoff + backoff.mul_f64(extra)
    }
}

/// TTL cache location and lifetimes
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub path: PathBuf,
    pub repositories_ttl: Duration,
    pub tags_ttl: Duration,
    pub manifest_ttl: Duration,
    /// Upper bound on concurrent tag/manifest fetches while expanding a listing
    pub fetch_concurrency: usize,
}

impl CacheConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            repositories_ttl: Duration::from_secs(300),
            tags_ttl: Duration::from_secs(300),
            manifest_ttl: Duration::from_secs(600),
            fetch_concurrency: 5,
        }
    }

    #[must_use]
    pub const fn with_ttls(mut self, repositories: Duration, tags: Duration, manifest: Duration) -> Self {
        self.repositories_ttl = repositories;
        self.tags_ttl = tags;
        self.manifest_ttl = manifest;
        self
    }

    #[must_use]
    pub fn with_fetch_concurrency(mut self, fetch_concurrency: usize) -> Self {
        self.fetch_concurrency = fetch_concurrency.max(1);
        self
    }
}

/// Everything needed to build a [`crate::registry::RegistryClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: RegistryEndpoint,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
}

impl ClientConfig {
    pub fn new(endpoint: RegistryEndpoint, cache: CacheConfig) -> Self {
        Self {
            endpoint,
            retry: RetryConfig::default(),
            cache,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.endpoint.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_defaults_to_https() {
        let endpoint = RegistryEndpoint::parse("registry.local:5000").unwrap();
        assert_eq!(endpoint.base_url.as_str(), "https://registry.local:5000/");
        assert_eq!(endpoint.registry_host(), "registry.local:5000");
    }

    #[test]
    fn path_is_reset_to_root() {
        let endpoint = RegistryEndpoint::parse("http://localhost:5000/v2/").unwrap();
        assert_eq!(
            endpoint.url_for("/v2/_catalog?n=100").unwrap().as_str(),
            "http://localhost:5000/v2/_catalog?n=100"
        );
        assert_eq!(endpoint.registry_host(), "localhost:5000");
    }

    #[test]
    fn rejects_unsupported_scheme() {
        assert!(matches!(
            RegistryEndpoint::parse("ftp://registry.local"),
            Err(RegistryError::Config(_))
        ));
        assert!(RegistryEndpoint::parse("   ").is_err());
    }

    #[test]
    fn username_requires_password() {
        let endpoint = RegistryEndpoint::parse("registry.local").unwrap();
        assert!(endpoint
            .clone()
            .with_optional_credentials(Some("ci".into()), None)
            .is_err());
        let endpoint = endpoint
            .with_optional_credentials(Some("ci".into()), Some("secret".into()))
            .unwrap();
        assert_eq!(endpoint.credentials, Some(Credentials::new("ci", "secret")));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("ci", "hunter2"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff(0), Duration::from_secs(1));
        assert_eq!(retry.backoff(1), Duration::from_secs(2));
        assert_eq!(retry.backoff(2), Duration::from_secs(4));
        assert_eq!(retry.backoff(10), Duration::from_secs(60));
    }

    #[test]
    fn jittered_backoff_is_strictly_increasing() {
        let retry = RetryConfig::default();
        for _ in 0..50 {
            let delays: Vec<Duration> = (0..3).map(|n| retry.jittered_backoff(n)).collect();
            assert!(delays[0] >= Duration::from_secs(1));
            assert!(delays[0] <= Duration::from_millis(1250));
            assert!(delays.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
