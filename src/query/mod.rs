//! Searching, sorting and paging over registry listings

pub mod pagination;
pub mod search;
pub mod service;
pub mod sort;

pub use pagination::{PAGE_SIZES, PageInfo, clamp_page_size};
pub use search::MatchKind;
pub use service::{QueryPage, RepositoryQueryService, ScoredResult, SearchQuery, TagQuery};
pub use sort::{SortDirection, SortField, TagSortField};
