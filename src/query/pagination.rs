//! Page arithmetic

use serde::{Deserialize, Serialize};

/// Page sizes callers may get; requests are rounded up to the next one.
pub const PAGE_SIZES: [usize; 3] = [20, 50, 100];

/// Round a requested page size up to the next allowed size, capped at the largest.
pub fn clamp_page_size(requested: usize) -> usize {
    PAGE_SIZES
        .iter()
        .copied()
        .find(|size| requested <= *size)
        .unwrap_or(PAGE_SIZES[PAGE_SIZES.len() - 1])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub page: usize,
    pub page_size: usize,
    pub total_count: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageInfo {
    pub fn new(page: usize, page_size: usize, total_count: usize) -> Self {
        let total_pages = total_count.div_ceil(page_size.max(1));
        Self {
            page,
            page_size,
            total_count,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }

    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

/// Cut one page out of `items`. `page` below 1 is read as 1 and `page_size`
/// is clamped; pages past the end are empty.
pub fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> (Vec<T>, PageInfo) {
    let info = PageInfo::new(page.max(1), clamp_page_size(page_size), items.len());
    let slice = items
        .into_iter()
        .skip(info.offset())
        .take(info.page_size)
        .collect();
    (slice, info)
}
