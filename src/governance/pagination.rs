//! Cursor-based pagination of ordered collections
//!
//! Ordering is the caller's responsibility and must be total. Items inserted or
//! removed between issuing a cursor and redeeming it can shift the window; no
//! snapshot is taken.

use super::cursor::{CursorCodec, ListQuery};
use crate::config::GovernorConfig;
use crate::error::{GovernanceError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Page metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total_count: usize,
    pub page_size: usize,
    pub has_more: bool,
}

/// One page of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub meta: PageMeta,
}

/// Where a page starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageStart {
    pub offset: usize,
    /// The presented cursor had expired and paging restarted at 0
    pub restarted: bool,
}

/// Slices collections into signed-cursor pages
#[derive(Debug, Clone)]
pub struct Paginator {
    codec: CursorCodec,
    default_page_size: usize,
    max_page_size: usize,
}

impl Paginator {
    pub fn new(codec: CursorCodec, default_page_size: usize, max_page_size: usize) -> Self {
        let max_page_size = max_page_size.max(1);
        Self {
            codec,
            default_page_size: default_page_size.clamp(1, max_page_size),
            max_page_size,
        }
    }

    pub fn from_config(codec: CursorCodec, config: &GovernorConfig) -> Self {
        Self::new(codec, config.default_page_size, config.max_page_size)
    }

    /// Effective page size; oversized requests are clamped, never rejected
    pub fn clamp_page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }

    /// Decode the cursor, if any, into a start offset
    pub fn resolve_start(&self, cursor: Option<&str>, query: &ListQuery) -> Result<PageStart> {
        let Some(token) = cursor.filter(|c| !c.is_empty()) else {
            return Ok(PageStart { offset: 0, restarted: false });
        };

        match self.codec.decode(token, &query.order_key, &query.fingerprint()) {
            Ok(offset) => Ok(PageStart { offset, restarted: false }),
            Err(GovernanceError::ExpiredCursor { age_secs, ttl_secs }) => {
                info!(
                    "Cursor expired ({}s old, ttl {}s); restarting from the first page",
                    age_secs, ttl_secs
                );
                Ok(PageStart { offset: 0, restarted: true })
            }
            Err(e) => Err(e),
        }
    }

    /// Slice `[offset, offset + page_size)` and issue the follow-up cursor
    pub fn page_at<T: Clone>(
        &self,
        items: &[T],
        offset: usize,
        page_size: usize,
        query: &ListQuery,
    ) -> Result<PaginatedResponse<T>> {
        let page_size = page_size.clamp(1, self.max_page_size);
        let total_count = items.len();
        let start = offset.min(total_count);
        let end = offset.saturating_add(page_size).min(total_count);
        let has_more = offset.saturating_add(page_size) < total_count;

        let next_cursor = if has_more {
            Some(self.codec.encode(offset + page_size, &query.order_key, &query.fingerprint())?)
        } else {
            None
        };

        debug!(
            "Page [{}, {}) of {} items (page_size={}, has_more={})",
            start, end, total_count, page_size, has_more
        );

        Ok(PaginatedResponse {
            items: items[start..end].to_vec(),
            next_cursor,
            meta: PageMeta {
                total_count,
                page_size,
                has_more,
            },
        })
    }

    /// Return the page addressed by `cursor` (first page when absent)
    pub fn paginate<T: Clone>(
        &self,
        items: &[T],
        query: &ListQuery,
        page_size: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<T>> {
        let start = self.resolve_start(cursor, query)?;
        self.page_at(items, start.offset, self.clamp_page_size(page_size), query)
    }

    pub fn codec(&self) -> &CursorCodec {
        &self.codec
    }
}
