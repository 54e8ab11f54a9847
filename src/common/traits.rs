//! Common traits shared by the registry client and its consumers

use crate::error::Result;
use crate::image::Manifest;
use crate::registry::models::{RepositoryInfo, TagInfo};
use async_trait::async_trait;

/// Read-only view of a registry.
///
/// [`crate::registry::RegistryClient`] implements it against a real registry;
/// tests and demos substitute in-memory providers. The query service depends
/// only on this trait.
#[async_trait]
pub trait RegistryProvider: Send + Sync {
    async fn list_repositories(&self) -> Result<Vec<RepositoryInfo>>;

    async fn list_tags(&self, repository: &str) -> Result<Vec<TagInfo>>;

    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest>;
}
