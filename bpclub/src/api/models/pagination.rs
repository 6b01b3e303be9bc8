//! Page-number pagination shared by list endpoints.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

/// Default number of items per page.
pub const DEFAULT_LIMIT: i64 = 10;

/// Largest page a client may request.
pub const MAX_LIMIT: i64 = 100;

/// `page` (1-based, default 1) and `limit` (default 10, clamped to 1..=100) query parameters.
#[serde_as]
#[derive(Debug, Default, Clone, Deserialize, IntoParams, ToSchema)]
pub struct PageParams {
    #[param(default = 1, minimum = 1)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub page: Option<i64>,

    #[param(default = 10, minimum = 1, maximum = 100)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub limit: Option<i64>,
}

impl PageParams {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self { page, limit }
    }

    #[inline]
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    #[inline]
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    #[inline]
    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }
}

/// Pagination block returned next to a page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaginationInfo {
    pub total: i64,
    pub pages: i64,
    pub page: i64,
    pub limit: i64,
}

impl PaginationInfo {
    pub fn new(total: i64, params: &PageParams) -> Self {
        let limit = params.limit();
        Self {
            total,
            pages: (total + limit - 1) / limit,
            page: params.page(),
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = PageParams::default();
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit(), 10);
        assert_eq!(params.offset(), 0);
    }

    #[test]
    fn test_offset_and_clamping() {
        let params = PageParams::new(Some(3), Some(25));
        assert_eq!(params.offset(), 50);

        let params = PageParams::new(Some(0), Some(1000));
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit(), MAX_LIMIT);
    }

    #[test]
    fn test_pages_rounds_up() {
        let params = PageParams::new(None, Some(10));
        assert_eq!(PaginationInfo::new(0, &params).pages, 0);
        assert_eq!(PaginationInfo::new(10, &params).pages, 1);
        assert_eq!(PaginationInfo::new(11, &params).pages, 2);
    }

    #[test]
    fn test_query_strings_parse() {
        let params: PageParams = serde_json::from_value(serde_json::json!({"page": "2", "limit": "5"})).unwrap();
        assert_eq!(params.offset(), 5);
    }
}
