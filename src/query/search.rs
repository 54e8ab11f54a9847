//! Relevance scoring for repository search

use serde::{Deserialize, Serialize};

/// How a name matched a search term. Ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Substring,
    Prefix,
    Exact,
}

impl MatchKind {
    pub fn score(self) -> u32 {
        match self {
            MatchKind::Exact => 3,
            MatchKind::Prefix => 2,
            MatchKind::Substring => 1,
        }
    }
}

/// Normalize a raw search string; blank means "no search".
pub fn normalize_term(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Case-insensitive match of `name` against an already normalized `term`.
/// `None` means the name is excluded from results.
pub fn match_name(name: &str, term: &str) -> Option<MatchKind> {
    let name = name.to_lowercase();
    if name == term {
        Some(MatchKind::Exact)
    } else if name.starts_with(term) {
        Some(MatchKind::Prefix)
    } else if name.contains(term) {
        Some(MatchKind::Substring)
    } else {
        None
    }
}

/// Match used for type-ahead suggestions: like [`match_name`], but the image
/// component after the last `/` also counts as a prefix match, so `api`
/// suggests `team/api-gateway`.
pub fn match_suggestion(name: &str, term: &str) -> Option<MatchKind> {
    let full = match_name(name, term);
    let component = name
        .rsplit_once('/')
        .map(|(_, image)| image.to_lowercase())
        .filter(|image| image.starts_with(term))
        .map(|_| MatchKind::Prefix);
    full.max(component)
}
