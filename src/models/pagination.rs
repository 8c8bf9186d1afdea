//! Offset pagination shared by the list endpoints.

/// Largest page any list endpoint returns.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// A 1-indexed page with a bounded size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    /// Build from raw query values.
    ///
    /// Missing values take the defaults; `page` is raised to at least 1 and
    /// `limit` is clamped to `1..=MAX_PAGE_LIMIT`.
    pub fn from_query(page: Option<i64>, limit: Option<i64>, default_limit: u32) -> Self {
        let page = page.unwrap_or(1).clamp(1, i64::from(u32::MAX)) as u32;
        let limit = limit
            .unwrap_or(i64::from(default_limit))
            .clamp(1, i64::from(MAX_PAGE_LIMIT)) as u32;
        Self { page, limit }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.limit)
    }
}
