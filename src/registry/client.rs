//! Registry client
//!
//! The three read operations of the registry API, each memoized in the
//! [`TtlCache`]:
//!
//! | operation           | cache key                    | default ttl |
//! |---------------------|------------------------------|-------------|
//! | `list_repositories` | `repositories`               | 300s        |
//! | `list_tags`         | `tags:<repo>`                | 300s        |
//! | `get_manifest`      | `manifest:<repo>:<ref>`      | 600s        |
//!
//! Listing repositories expands every repository through `list_tags`, and
//! listing tags expands every tag through `get_manifest`, so each level is
//! cached on its own. A repository whose tags are not found is listed with no
//! tags, and a tag whose manifest is not found is left out; every other
//! failure fails the listing.

use crate::cache::{CacheStats, Invalidation, TtlCache};
use crate::common::traits::RegistryProvider;
use crate::common::utils::{DigestUtils, FormatUtils, next_link};
use crate::config::{CacheConfig, ClientConfig};
use crate::error::{RegistryError, Result};
use crate::image::manifest::{
    DOCKER_MANIFEST_V2, Descriptor, ImageConfigBlob, Layer, Manifest, ManifestDocument, ManifestKind,
    build_manifest_accept_header,
};
use crate::registry::models::{RepositoryInfo, TagInfo};
use crate::registry::token_manager::AuthManager;
use crate::registry::transport::{HttpBackend, HttpResponse, ReqwestBackend, RetryingTransport};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const REPOSITORIES_KEY: &str = "repositories";
const CATALOG_PAGE_SIZE: usize = 100;
/// Upper bound on followed `Link` continuations for one listing.
const MAX_PAGES: usize = 10_000;

pub fn tags_key(repository: &str) -> String {
    format!("tags:{}", repository)
}

pub fn manifest_key(repository: &str, reference: &str) -> String {
    format!("manifest:{}:{}", repository, reference)
}

#[derive(Debug, Deserialize)]
struct CatalogPage {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TagsPage {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// One page of a `Link`-paginated listing
trait ListingPage: DeserializeOwned {
    fn into_items(self) -> Vec<String>;
}

impl ListingPage for CatalogPage {
    fn into_items(self) -> Vec<String> {
        self.repositories.unwrap_or_default()
    }
}

impl ListingPage for TagsPage {
    fn into_items(self) -> Vec<String> {
        self.tags.unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct RegistryClient {
    transport: Arc<RetryingTransport>,
    cache: TtlCache,
    settings: Arc<CacheConfig>,
}

impl RegistryClient {
    /// Build a client talking to a real registry over HTTP.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let backend: Arc<dyn HttpBackend> =
            Arc::new(ReqwestBackend::new(&config.endpoint, config.retry.request_timeout)?);
        let cache = match TtlCache::open(&config.cache.path).await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(
                    path = %config.cache.path.display(),
                    error = %e,
                    "Cache store unavailable, using an in-memory cache"
                );
                TtlCache::open_in_memory().await?
            }
        };
        info!(
            registry = %config.endpoint.base_url,
            cache = %config.cache.path.display(),
            "Registry client ready"
        );
        Ok(Self::with_backend(config, backend, cache))
    }

    /// Build a client on an explicit HTTP backend and cache store.
    pub fn with_backend(config: ClientConfig, backend: Arc<dyn HttpBackend>, cache: TtlCache) -> Self {
        let auth = Arc::new(AuthManager::new(
            config.endpoint.credentials.clone(),
            Arc::clone(&backend),
            config.retry.request_timeout,
        ));
        let transport = Arc::new(RetryingTransport::new(config.endpoint, backend, auth, config.retry));
        Self {
            transport,
            cache,
            settings: Arc::new(config.cache),
        }
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        self.transport.auth()
    }

    /// Every repository in the catalog with its tag count and last update.
    #[instrument(skip(self))]
    pub async fn list_repositories(&self) -> Result<Vec<RepositoryInfo>> {
        let client = self.clone();
        self.cache
            .get_or_compute(REPOSITORIES_KEY, self.settings.repositories_ttl, move || async move {
                let names = client.fetch_catalog().await?;
                info!(count = names.len(), "Fetched repository catalog");

                let summaries: Vec<_> = names
                    .into_iter()
                    .map(|name| {
                        let client = client.clone();
                        async move {
                            match client.list_tags(&name).await {
                                Ok(tags) => Ok(RepositoryInfo::from_tags(name, &tags)),
                                // Listed in the catalog but gone or unreadable by name.
                                Err(RegistryError::NotFound(reason)) => {
                                    warn!(
                                        repository = %name,
                                        %reason,
                                        "Repository tags not found, listing it empty"
                                    );
                                    Ok(RepositoryInfo::from_tags(name, &[]))
                                }
                                Err(e) => Err(e),
                            }
                        }
                    })
                    .collect();

                stream::iter(summaries)
                    .buffered(client.settings.fetch_concurrency.max(1))
                    .try_collect()
                    .await
            })
            .await
    }

    /// Every tag of `repository`, resolved through its manifest.
    #[instrument(skip(self))]
    pub async fn list_tags(&self, repository: &str) -> Result<Vec<TagInfo>> {
        validate_repository(repository)?;

        let client = self.clone();
        let repository = repository.to_string();
        let key = tags_key(&repository);
        self.cache
            .get_or_compute(&key, self.settings.tags_ttl, move || async move {
                let names = client.fetch_tag_names(&repository).await?;
                debug!(repository = %repository, count = names.len(), "Fetched tag names");
                let host = client.transport.endpoint().registry_host();

                let resolutions: Vec<_> = names
                    .into_iter()
                    .map(|tag| {
                        let client = client.clone();
                        let repository = repository.clone();
                        let host = host.clone();
                        async move {
                            let manifest = match client.get_manifest(&repository, &tag).await {
                                Ok(manifest) => manifest,
                                // Tag points at a manifest that no longer exists.
                                Err(RegistryError::NotFound(reason)) => {
                                    warn!(
                                        repository = %repository,
                                        tag = %tag,
                                        %reason,
                                        "Skipping dangling tag"
                                    );
                                    return Ok(None);
                                }
                                Err(e) => return Err(e),
                            };
                            Ok::<_, RegistryError>(Some(TagInfo {
                                pull_command: FormatUtils::pull_command(&host, &repository, &tag),
                                name: tag,
                                digest: manifest.digest,
                                size: manifest.total_size,
                                created: manifest.created,
                            }))
                        }
                    })
                    .collect();

                let tags: Vec<Option<TagInfo>> = stream::iter(resolutions)
                    .buffered(client.settings.fetch_concurrency.max(1))
                    .try_collect()
                    .await?;
                Ok::<_, RegistryError>(tags.into_iter().flatten().collect::<Vec<_>>())
            })
            .await
    }

    /// Resolved manifest of `repository:reference` (tag or digest).
    #[instrument(skip(self))]
    pub async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        validate_repository(repository)?;
        validate_reference(reference)?;

        let client = self.clone();
        let repository = repository.to_string();
        let reference = reference.to_string();
        let key = manifest_key(&repository, &reference);
        self.cache
            .get_or_compute(&key, self.settings.manifest_ttl, move || async move {
                client.fetch_manifest(&repository, &reference).await
            })
            .await
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        self.cache.stats().await
    }

    /// Drop cached entries under `prefix`, or everything when `None`.
    pub async fn clear_cache(&self, prefix: Option<&str>) -> Result<u64> {
        match prefix {
            Some(prefix) => self.cache.invalidate(Invalidation::Prefix(prefix)).await,
            None => self.cache.clear().await,
        }
    }

    /// Forget one repository's tags and manifests, plus the repository list
    /// that summarizes them.
    pub async fn invalidate_repository(&self, repository: &str) -> Result<u64> {
        let mut removed = self
            .cache
            .invalidate(Invalidation::Key(&tags_key(repository)))
            .await?;
        removed += self
            .cache
            .invalidate(Invalidation::Prefix(&format!("manifest:{}:", repository)))
            .await?;
        removed += self.cache.invalidate(Invalidation::Key(REPOSITORIES_KEY)).await?;
        Ok(removed)
    }

    async fn fetch_catalog(&self) -> Result<Vec<String>> {
        let first = format!("/v2/_catalog?n={}", CATALOG_PAGE_SIZE);
        self.fetch_paginated::<CatalogPage>(&first).await
    }

    async fn fetch_tag_names(&self, repository: &str) -> Result<Vec<String>> {
        let first = format!("/v2/{}/tags/list", repository);
        self.fetch_paginated::<TagsPage>(&first).await
    }

    /// Follow `Link: <...>; rel="next"` continuations until exhausted.
    async fn fetch_paginated<P: ListingPage>(&self, first: &str) -> Result<Vec<String>> {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(first.to_string());

        while let Some(path) = next.take() {
            if !seen.insert(path.clone()) || seen.len() > MAX_PAGES {
                return Err(RegistryError::Parse(format!(
                    "registry pagination does not terminate at {}",
                    path
                )));
            }

            let response = self
                .transport
                .get(&path, accept(HeaderValue::from_static("application/json")))
                .await?;
            items.extend(response.json::<P>()?.into_items());
            next = response.header("link").and_then(next_link);
        }

        Ok(items)
    }

    async fn fetch_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        let response = self.request_manifest(repository, reference).await?;
        let digest = response
            .header("docker-content-digest")
            .map(str::to_string)
            .unwrap_or_else(|| DigestUtils::compute_docker_digest(&response.body));
        let content_type = response.header(CONTENT_TYPE.as_str()).map(str::to_string);
        let document: ManifestDocument = response.json()?;

        match document.kind(content_type.as_deref()) {
            ManifestKind::Image => {
                self.resolve_image(repository, reference, digest, content_type, &document)
                    .await
            }
            ManifestKind::SchemaV1 => {
                self.resolve_schema_v1(repository, reference, digest, content_type, &document)
                    .await
            }
            ManifestKind::Index => {
                let entry = document.preferred_platform_entry().ok_or_else(|| {
                    RegistryError::Parse(format!(
                        "manifest list for {}:{} has no entries",
                        repository, reference
                    ))
                })?;
                debug!(repository, reference, platform_digest = %entry.digest, "Resolving manifest list entry");

                let platform = self.request_manifest(repository, &entry.digest).await?;
                let platform_type = platform.header(CONTENT_TYPE.as_str()).map(str::to_string);
                let platform_doc: ManifestDocument = platform.json()?;
                match platform_doc.kind(platform_type.as_deref()) {
                    // The tag keeps the digest of the list itself.
                    ManifestKind::Image => {
                        self.resolve_image(repository, reference, digest, platform_type, &platform_doc)
                            .await
                    }
                    ManifestKind::SchemaV1 => {
                        self.resolve_schema_v1(repository, reference, digest, platform_type, &platform_doc)
                            .await
                    }
                    ManifestKind::Index => Err(RegistryError::Parse(format!(
                        "nested manifest list in {}:{}",
                        repository, reference
                    ))),
                }
            }
        }
    }

    async fn request_manifest(&self, repository: &str, reference: &str) -> Result<HttpResponse> {
        let accept_value = HeaderValue::from_str(&build_manifest_accept_header())
            .map_err(|e| RegistryError::Internal(format!("invalid Accept header: {}", e)))?;
        self.transport
            .get(&format!("/v2/{}/manifests/{}", repository, reference), accept(accept_value))
            .await
    }

    async fn resolve_image(
        &self,
        repository: &str,
        reference: &str,
        digest: String,
        content_type: Option<String>,
        document: &ManifestDocument,
    ) -> Result<Manifest> {
        let layers = self.sized_layers(repository, &document.layers).await?;

        let config = match &document.config {
            Some(config) => self.fetch_config_blob(repository, &config.digest).await?,
            None => ImageConfigBlob::default(),
        };

        Ok(Manifest {
            repository: repository.to_string(),
            reference: reference.to_string(),
            digest,
            media_type: media_type_of(content_type, document),
            schema_version: document.schema_version,
            config_digest: document.config.as_ref().map(|c| c.digest.clone()),
            total_size: layers.iter().map(|l| l.size).sum(),
            layers,
            created: config.created_at(),
            architecture: config.architecture,
            os: config.os,
        })
    }

    async fn resolve_schema_v1(
        &self,
        repository: &str,
        reference: &str,
        digest: String,
        content_type: Option<String>,
        document: &ManifestDocument,
    ) -> Result<Manifest> {
        // fsLayers run newest first and may repeat the same blob.
        let mut seen = HashSet::new();
        let descriptors: Vec<Descriptor> = document
            .fs_layers
            .iter()
            .rev()
            .filter(|layer| seen.insert(layer.blob_sum.clone()))
            .map(|layer| Descriptor {
                media_type: None,
                digest: layer.blob_sum.clone(),
                size: None,
                platform: None,
            })
            .collect();

        let layers = self.sized_layers(repository, &descriptors).await?;
        let metadata = document.v1_image_metadata().unwrap_or_default();

        Ok(Manifest {
            repository: repository.to_string(),
            reference: reference.to_string(),
            digest,
            media_type: media_type_of(content_type, document),
            schema_version: document.schema_version,
            config_digest: None,
            total_size: layers.iter().map(|l| l.size).sum(),
            layers,
            created: metadata.created_at(),
            architecture: metadata
                .architecture
                .or_else(|| document.architecture.clone()),
            os: metadata.os,
        })
    }

    /// Layers with sizes; descriptors without one are sized by a blob HEAD.
    /// Any failing HEAD fails the whole manifest.
    async fn sized_layers(&self, repository: &str, descriptors: &[Descriptor]) -> Result<Vec<Layer>> {
        let lookups: Vec<_> = descriptors
            .iter()
            .cloned()
            .map(|descriptor| {
                let client = self.clone();
                let repository = repository.to_string();
                async move {
                    let size = match descriptor.size {
                        Some(size) => size,
                        None => client.blob_size(&repository, &descriptor.digest).await?,
                    };
                    Ok::<_, RegistryError>(Layer {
                        digest: descriptor.digest,
                        size,
                        media_type: descriptor.media_type,
                    })
                }
            })
            .collect();

        stream::iter(lookups)
            .buffered(self.settings.fetch_concurrency.max(1))
            .try_collect()
            .await
    }

    async fn blob_size(&self, repository: &str, digest: &str) -> Result<u64> {
        let response = self
            .transport
            .head(&format!("/v2/{}/blobs/{}", repository, digest))
            .await?;
        response.content_length().ok_or_else(|| {
            RegistryError::Parse(format!(
                "blob {} in {} has no Content-Length",
                digest, repository
            ))
        })
    }

    async fn fetch_config_blob(&self, repository: &str, digest: &str) -> Result<ImageConfigBlob> {
        let response = self
            .transport
            .get(&format!("/v2/{}/blobs/{}", repository, digest), HeaderMap::new())
            .await?;
        response.json()
    }
}

#[async_trait]
impl RegistryProvider for RegistryClient {
    async fn list_repositories(&self) -> Result<Vec<RepositoryInfo>> {
        RegistryClient::list_repositories(self).await
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<TagInfo>> {
        RegistryClient::list_tags(self, repository).await
    }

    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        RegistryClient::get_manifest(self, repository, reference).await
    }
}

fn accept(value: HeaderValue) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, value);
    headers
}

fn media_type_of(content_type: Option<String>, document: &ManifestDocument) -> String {
    content_type
        .map(|ct| ct.split(';').next().unwrap_or_default().trim().to_string())
        .filter(|ct| !ct.is_empty() && ct != "application/json")
        .or_else(|| document.media_type.clone())
        .unwrap_or_else(|| DOCKER_MANIFEST_V2.to_string())
}

/// Repository names are path components like `team/app`; anything that
/// could escape the `/v2/<name>/` path is refused.
fn validate_repository(repository: &str) -> Result<()> {
    let valid = !repository.is_empty()
        && repository.len() <= 255
        && repository.split('/').all(|part| {
            !part.is_empty()
                && part != "."
                && part != ".."
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
        });
    if valid {
        Ok(())
    } else {
        Err(RegistryError::NotFound(format!("invalid repository name '{}'", repository)))
    }
}

fn validate_reference(reference: &str) -> Result<()> {
    let is_digest = reference.split_once(':').is_some_and(|(algo, hex)| {
        !algo.is_empty() && !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit())
    });
    let is_tag = !reference.is_empty()
        && reference.len() <= 128
        && reference
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        && !reference.starts_with(['.', '-']);
    if is_digest || is_tag {
        Ok(())
    } else {
        Err(RegistryError::NotFound(format!("invalid tag or digest '{}'", reference)))
    }
}
