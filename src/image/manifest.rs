//! Manifest wire formats and the resolved [`Manifest`] the client hands out

use crate::common::utils::TimeUtils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_V2: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_MANIFEST_V1_SIGNED: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";

/// Accept header for manifest requests, most preferred first.
pub fn build_manifest_accept_header() -> String {
    [
        DOCKER_MANIFEST_V2,
        OCI_MANIFEST_V1,
        DOCKER_MANIFEST_LIST_V2,
        OCI_INDEX_V1,
        DOCKER_MANIFEST_V1_SIGNED,
        DOCKER_MANIFEST_V1,
    ]
    .join(", ")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: Option<String>,
    pub digest: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Platform {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsLayer {
    pub blob_sum: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1History {
    pub v1_compatibility: String,
}

/// Any manifest document the registry may return. Which fields are present
/// depends on the schema.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub config: Option<Descriptor>,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(default)]
    pub fs_layers: Vec<FsLayer>,
    #[serde(default)]
    pub history: Vec<V1History>,
    #[serde(default)]
    pub architecture: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// Docker schema2 or OCI image manifest
    Image,
    /// Docker manifest list or OCI index
    Index,
    /// Docker schema1, no layer sizes
    SchemaV1,
}

impl ManifestDocument {
    /// Classify by `Content-Type`, falling back to the document's own fields.
    pub fn kind(&self, content_type: Option<&str>) -> ManifestKind {
        let media_type = content_type
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_string())
            .filter(|ct| !ct.is_empty() && ct != "application/json")
            .or_else(|| self.media_type.clone());

        match media_type.as_deref() {
            Some(DOCKER_MANIFEST_LIST_V2) | Some(OCI_INDEX_V1) => ManifestKind::Index,
            Some(DOCKER_MANIFEST_V1) | Some(DOCKER_MANIFEST_V1_SIGNED) => ManifestKind::SchemaV1,
            Some(DOCKER_MANIFEST_V2) | Some(OCI_MANIFEST_V1) => ManifestKind::Image,
            _ if self.schema_version == 1 => ManifestKind::SchemaV1,
            _ if !self.manifests.is_empty() => ManifestKind::Index,
            _ => ManifestKind::Image,
        }
    }

    /// Entry of an index to resolve: `linux/amd64` when present, else the first.
    pub fn preferred_platform_entry(&self) -> Option<&Descriptor> {
        self.manifests
            .iter()
            .find(|d| {
                d.platform
                    .as_ref()
                    .is_some_and(|p| p.os == "linux" && p.architecture == "amd64")
            })
            .or_else(|| self.manifests.first())
    }

    /// `created`/`architecture`/`os` from the newest schema1 history entry.
    pub fn v1_image_metadata(&self) -> Option<ImageConfigBlob> {
        let entry = self.history.first()?;
        serde_json::from_str(&entry.v1_compatibility).ok()
    }
}

/// The fields read from an image config blob
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfigBlob {
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
}

impl ImageConfigBlob {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created.as_deref().and_then(TimeUtils::parse_timestamp)
    }
}

/// One layer of a resolved manifest, size always known
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Layer {
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// Manifest of one repository reference with sizes and dates resolved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub repository: String,
    pub reference: String,
    /// Digest `docker pull` resolves the reference to
    pub digest: String,
    pub media_type: String,
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_digest: Option<String>,
    pub layers: Vec<Layer>,
    /// Sum of compressed layer sizes
    pub total_size: u64,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
}

impl Manifest {
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}
