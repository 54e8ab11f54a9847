//! Values handed out by registry listings

use crate::common::utils::FormatUtils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One registry repository. Rebuilt wholesale on every catalog fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryInfo {
    pub name: String,
    /// Length of the tag list this entry was derived from
    pub tag_count: usize,
    /// Creation time of the newest tag
    pub last_updated: Option<DateTime<Utc>>,
}

impl RepositoryInfo {
    /// Derive the summary from a complete tag list.
    pub fn from_tags(name: impl Into<String>, tags: &[TagInfo]) -> Self {
        Self {
            name: name.into(),
            tag_count: tags.len(),
            last_updated: tags.iter().filter_map(|t| t.created).max(),
        }
    }
}

/// One tag of a repository
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagInfo {
    pub name: String,
    pub digest: String,
    /// Compressed size in bytes
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub pull_command: String,
}

impl TagInfo {
    pub fn formatted_size(&self) -> String {
        FormatUtils::format_size(self.size)
    }
}
