//! Per-request telemetry record

use crate::governance::models::{Diagnostic, Strategy};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Well-known `optimization_metadata` keys
pub mod keys {
    pub const CANDIDATE_TOKENS: &str = "candidateTokens";
    pub const BUDGET_USED: &str = "budgetUsed";
    pub const OFFSET: &str = "offset";
    pub const PAGE_SIZE: &str = "pageSize";
    pub const PAGE_SHRINKS: &str = "pageShrinks";
    pub const CHUNK_INDEX: &str = "chunkIndex";
    pub const TOTAL_CHUNKS: &str = "totalChunks";
    pub const CHUNK_BYTES: &str = "chunkBytes";
    pub const CHUNK_SHRINKS: &str = "chunkShrinks";
    pub const CONTENT_KIND: &str = "contentKind";
    pub const BOUNDARY_FALLBACK: &str = "boundaryFallback";
    pub const PROJECTED_FIELDS: &str = "projectedFields";
    pub const TOTAL_FIELDS: &str = "totalFields";
    pub const UNCONFIGURED_TYPE: &str = "unconfiguredType";
    pub const MISSING_IDENTIFIER: &str = "missingIdentifier";
    pub const SUMMARY_REQUESTED: &str = "summaryRequested";
    pub const ALL_FIELDS_REQUESTED: &str = "allFieldsRequested";
    pub const CURSOR_RESTARTED: &str = "cursorRestarted";
    pub const ERROR_CODE: &str = "errorCode";
    pub const CURSOR_REJECTION: &str = "cursorRejection";
}

/// What happened to one governed request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub request_id: Uuid,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    pub estimated_tokens: usize,
    pub response_bytes: usize,
    pub item_count: usize,
    pub latency_ms: u64,
    strategy: Strategy,
    // Derived from `strategy`, so at most one of pagination/chunking is set
    pagination_used: bool,
    summarization_used: bool,
    chunking_used: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub optimization_metadata: IndexMap<String, Value>,
}

impl TelemetryRecord {
    pub fn new(endpoint: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            endpoint: endpoint.into(),
            timestamp: Utc::now(),
            estimated_tokens: 0,
            response_bytes: 0,
            item_count: 0,
            latency_ms: 0,
            strategy,
            pagination_used: strategy == Strategy::Paginate,
            summarization_used: strategy == Strategy::Summarize,
            chunking_used: strategy == Strategy::Chunk,
            diagnostics: Vec::new(),
            optimization_metadata: IndexMap::new(),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn pagination_used(&self) -> bool {
        self.pagination_used
    }

    pub fn summarization_used(&self) -> bool {
        self.summarization_used
    }

    pub fn chunking_used(&self) -> bool {
        self.chunking_used
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.optimization_metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn has_hard_cap_violation(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::HardCapViolation { .. }))
    }
}
