//! Sort fields and orderings for repositories and tags

use crate::error::RegistryError;
use crate::registry::models::{RepositoryInfo, TagInfo};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Name,
    LastUpdated,
    TagCount,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagSortField {
    #[default]
    Tag,
    Created,
    Size,
}

impl FromStr for SortField {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(SortField::Name),
            "last_updated" | "last-updated" | "updated" => Ok(SortField::LastUpdated),
            "tag_count" | "tag-count" | "tags" => Ok(SortField::TagCount),
            other => Err(RegistryError::Config(format!(
                "invalid sort field '{}', expected name, last_updated or tag_count",
                other
            ))),
        }
    }
}

impl FromStr for SortDirection {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(RegistryError::Config(format!(
                "invalid sort direction '{}', expected asc or desc",
                other
            ))),
        }
    }
}

impl FromStr for TagSortField {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tag" | "name" => Ok(TagSortField::Tag),
            "created" => Ok(TagSortField::Created),
            "size" => Ok(TagSortField::Size),
            other => Err(RegistryError::Config(format!(
                "invalid tag sort field '{}', expected tag, created or size",
                other
            ))),
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortField::Name => "name",
            SortField::LastUpdated => "last_updated",
            SortField::TagCount => "tag_count",
        })
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        })
    }
}

impl SortDirection {
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// Case-insensitive name order with the raw name as a final tie-breaker.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
}

/// Order by the requested field and direction. A missing `last_updated`
/// sorts as the oldest value.
pub fn compare_repositories(
    a: &RepositoryInfo,
    b: &RepositoryInfo,
    field: SortField,
    direction: SortDirection,
) -> Ordering {
    let ordering = match field {
        SortField::Name => compare_names(&a.name, &b.name),
        SortField::LastUpdated => a.last_updated.cmp(&b.last_updated),
        SortField::TagCount => a.tag_count.cmp(&b.tag_count),
    };
    direction.apply(ordering)
}

pub fn compare_tags(a: &TagInfo, b: &TagInfo, field: TagSortField, direction: SortDirection) -> Ordering {
    let ordering = match field {
        TagSortField::Tag => compare_names(&a.name, &b.name),
        TagSortField::Created => a.created.cmp(&b.created),
        TagSortField::Size => a.size.cmp(&b.size),
    };
    direction
        .apply(ordering)
        .then_with(|| compare_names(&a.name, &b.name))
}
