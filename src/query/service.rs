//! Repository query service
//!
//! Turns the full repository list of a [`RegistryProvider`] into the exact
//! page a caller asked for. Evaluation is a pure function of the provider's
//! data and the query; the service keeps no state of its own.

use crate::common::traits::RegistryProvider;
use crate::error::Result;
use crate::query::pagination::{PageInfo, paginate};
use crate::query::search::{match_name, match_suggestion, normalize_term};
use crate::query::sort::{SortDirection, SortField, TagSortField, compare_names, compare_repositories, compare_tags};
use crate::registry::models::{RepositoryInfo, TagInfo};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Search, sort and page request for repositories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
    pub sort: SortField,
    pub direction: SortDirection,
    pub page: usize,
    pub page_size: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            search: None,
            sort: SortField::Name,
            direction: SortDirection::Asc,
            page: 1,
            page_size: 20,
        }
    }
}

impl SearchQuery {
    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    #[must_use]
    pub const fn sorted_by(mut self, sort: SortField, direction: SortDirection) -> Self {
        self.sort = sort;
        self.direction = direction;
        self
    }

    #[must_use]
    pub const fn with_page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }
}

/// Search, sort and page request for one repository's tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagQuery {
    pub search: Option<String>,
    pub sort: TagSortField,
    pub direction: SortDirection,
    pub page: usize,
    pub page_size: usize,
}

impl Default for TagQuery {
    fn default() -> Self {
        Self {
            search: None,
            sort: TagSortField::Tag,
            direction: SortDirection::Asc,
            page: 1,
            page_size: 20,
        }
    }
}

/// A repository with its relevance. `score` is 0 when no search was given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredResult {
    #[serde(flatten)]
    pub repository: RepositoryInfo,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPage<T> {
    pub results: Vec<T>,
    pub total_count: usize,
    pub page_info: PageInfo,
}

impl<T> QueryPage<T> {
    fn from_ranked(ranked: Vec<T>, page: usize, page_size: usize) -> Self {
        let (results, page_info) = paginate(ranked, page, page_size);
        Self {
            results,
            total_count: page_info.total_count,
            page_info,
        }
    }
}

pub struct RepositoryQueryService {
    provider: Arc<dyn RegistryProvider>,
}

impl RepositoryQueryService {
    pub fn new(provider: Arc<dyn RegistryProvider>) -> Self {
        Self { provider }
    }

    /// One page of repositories matching `query`.
    pub async fn query(&self, query: &SearchQuery) -> Result<QueryPage<ScoredResult>> {
        let repositories = self.provider.list_repositories().await?;
        let page = evaluate(repositories, query);
        debug!(
            search = ?query.search,
            total = page.total_count,
            returned = page.results.len(),
            "Evaluated repository query"
        );
        Ok(page)
    }

    /// One page of `repository`'s tags.
    pub async fn query_tags(&self, repository: &str, query: &TagQuery) -> Result<QueryPage<TagInfo>> {
        let tags = self.provider.list_tags(repository).await?;
        Ok(evaluate_tags(tags, query))
    }

    /// Up to `limit` repository names for type-ahead, best match first.
    pub async fn suggest(&self, partial: &str, limit: usize) -> Result<Vec<String>> {
        let Some(term) = normalize_term(Some(partial)) else {
            return Ok(Vec::new());
        };

        let repositories = self.provider.list_repositories().await?;
        let mut matches: Vec<_> = repositories
            .into_iter()
            .filter_map(|repo| match_suggestion(&repo.name, &term).map(|kind| (kind, repo.name)))
            .collect();
        matches.sort_by(|(ka, a), (kb, b)| kb.cmp(ka).then_with(|| compare_names(a, b)));
        Ok(matches.into_iter().take(limit).map(|(_, name)| name).collect())
    }
}

/// Rank, sort and paginate `repositories`.
///
/// With a search term, names that do not match are dropped and relevance
/// orders first; the requested sort field breaks ties, then the name.
pub fn evaluate(repositories: Vec<RepositoryInfo>, query: &SearchQuery) -> QueryPage<ScoredResult> {
    let term = normalize_term(query.search.as_deref());

    let mut ranked: Vec<ScoredResult> = repositories
        .into_iter()
        .filter_map(|repository| match &term {
            Some(term) => match_name(&repository.name, term).map(|kind| ScoredResult {
                repository,
                score: kind.score(),
            }),
            None => Some(ScoredResult { repository, score: 0 }),
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| compare_repositories(&a.repository, &b.repository, query.sort, query.direction))
            .then_with(|| compare_names(&a.repository.name, &b.repository.name))
    });

    QueryPage::from_ranked(ranked, query.page, query.page_size)
}

/// Filter tags by substring, sort and paginate.
pub fn evaluate_tags(tags: Vec<TagInfo>, query: &TagQuery) -> QueryPage<TagInfo> {
    let term = normalize_term(query.search.as_deref());
    let mut tags: Vec<TagInfo> = tags
        .into_iter()
        .filter(|tag| {
            term.as_deref()
                .is_none_or(|term| tag.name.to_lowercase().contains(term))
        })
        .collect();
    tags.sort_by(|a, b| compare_tags(a, b, query.sort, query.direction));
    QueryPage::from_ranked(tags, query.page, query.page_size)
}
