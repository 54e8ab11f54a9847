//! Docker Registry Browser Library
//!
//! A read-only client for the Docker Registry HTTP API v2. Registry reads go
//! through a retrying, authenticating transport and are memoized in a
//! persistent TTL cache; [`query::RepositoryQueryService`] turns the cached
//! catalog into searchable, sorted, paginated views.

pub mod cache;
pub mod cli;
pub mod common;
pub mod config;
pub mod error;
pub mod image;
pub mod logging;
pub mod query;
pub mod registry;

pub use cache::{CacheStats, TtlCache};
pub use common::RegistryProvider;
pub use config::{CacheConfig, ClientConfig, Credentials, RegistryEndpoint, RetryConfig};
pub use error::{RegistryError, Result};
pub use image::Manifest;
pub use query::{RepositoryQueryService, SearchQuery, SortDirection, SortField};
pub use registry::{RegistryClient, RepositoryInfo, TagInfo};
