// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Page/limit request for a list operation. `page` is 1-based; `limit` is
/// clamped by [`PageRequest::normalized`] so callers never hand a store a
/// zero or unbounded page size (§4.11).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default = "PageRequest::default_page")]
    pub page: u32,
    #[serde(default = "PageRequest::default_limit")]
    pub limit: u32,
}

impl PageRequest {
    pub const MAX_LIMIT: u32 = 200;

    fn default_page() -> u32 {
        1
    }

    fn default_limit() -> u32 {
        20
    }

    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    /// Clamp `page` to at least 1 and `limit` to `[1, MAX_LIMIT]`.
    pub fn normalized(&self) -> PageRequest {
        PageRequest {
            page: self.page.max(1),
            limit: self.limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    /// Zero-based offset into the full result set.
    pub fn offset(&self) -> usize {
        let n = self.normalized();
        (n.page as usize - 1) * n.limit as usize
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: Self::default_page(),
            limit: Self::default_limit(),
        }
    }
}

/// Uniform list envelope every list operation returns (§4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let n = request.normalized();
        Self {
            items,
            total,
            page: n.page,
            limit: n.limit,
        }
    }

    /// Slice `all` according to `request`, building both the page and its
    /// envelope in one step. Intended for in-memory store implementations.
    pub fn slice(all: &[T], request: PageRequest) -> Page<T>
    where
        T: Clone,
    {
        let n = request.normalized();
        let offset = request.offset();
        let items = all
            .iter()
            .skip(offset)
            .take(n.limit as usize)
            .cloned()
            .collect();
        Page::new(items, all.len() as u64, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_clamps_page_and_limit() {
        let r = PageRequest::new(0, 0).normalized();
        assert_eq!(r.page, 1);
        assert_eq!(r.limit, 1);

        let r = PageRequest::new(3, 10_000).normalized();
        assert_eq!(r.page, 3);
        assert_eq!(r.limit, PageRequest::MAX_LIMIT);
    }

    #[test]
    fn offset_is_zero_based() {
        assert_eq!(PageRequest::new(1, 20).offset(), 0);
        assert_eq!(PageRequest::new(2, 20).offset(), 20);
        assert_eq!(PageRequest::new(3, 10).offset(), 20);
    }

    #[test]
    fn slice_returns_requested_window_and_true_total() {
        let all: Vec<u32> = (0..50).collect();
        let page = Page::slice(&all, PageRequest::new(2, 10));
        assert_eq!(page.items, (10..20).collect::<Vec<_>>());
        assert_eq!(page.total, 50);
        assert_eq!(page.page, 2);
        assert_eq!(page.limit, 10);
    }

    #[test]
    fn slice_past_end_is_empty_but_total_is_preserved() {
        let all: Vec<u32> = (0..5).collect();
        let page = Page::slice(&all, PageRequest::new(10, 10));
        assert!(page.items.is_empty());
        assert_eq!(page.total, 5);
    }
}
