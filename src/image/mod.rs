//! Image metadata types
//!
//! Manifests come in several schemas (Docker schema1 and schema2, OCI image
//! manifests, manifest lists and OCI indexes). [`manifest`] models the wire
//! documents and the resolved [`Manifest`] handed out by the registry client.

pub mod manifest;

pub use manifest::{Layer, Manifest, ManifestDocument, ManifestKind};
