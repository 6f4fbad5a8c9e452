//! Bounded pagination for list operations.
//!
//! Page size is clamped to a hard cap and sort keys must come from a
//! per-entity allow-list, so a caller can neither trigger an unbounded scan
//! nor inject through the sort field.

use serde::{Deserialize, Serialize};

/// Hard upper cap on page size.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Page size used when the caller does not specify one.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    Desc,
}

/// Requested ordering; the key is validated against the entity's allow-list
/// before any SQL is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: String,
    pub dir: SortDir,
}

impl SortSpec {
    pub fn asc(key: impl Into<String>) -> Self {
        Self { key: key.into(), dir: SortDir::Asc }
    }

    pub fn desc(key: impl Into<String>) -> Self {
        Self { key: key.into(), dir: SortDir::Desc }
    }
}

/// A bounded page request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    limit: u32,
    offset: u64,
    pub sort: Option<SortSpec>,
}

impl Page {
    /// Build a page request; `limit` is clamped into `1..=MAX_PAGE_SIZE`.
    pub fn new(limit: u32, offset: u64) -> Self {
        Self {
            limit: limit.clamp(1, MAX_PAGE_SIZE),
            offset,
            sort: None,
        }
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, 0)
    }
}
