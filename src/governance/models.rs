//! Data models shared by the governance strategies

use super::chunker::ContentChunk;
use super::pagination::PaginatedResponse;
use super::summarizer::{SummaryResponse, ALL_FIELDS_VALUE};
use super::token_budget::TokenBudget;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// What kind of value a candidate response is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateShape {
    /// Ordered collection, mitigated by pagination
    List,
    /// Single structured object, mitigated by summarization
    Object,
    /// Raw text, mitigated by chunking
    Text,
    /// Anything else; cannot be reduced
    Scalar,
}

/// Mitigation applied to a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    PassThrough,
    Paginate,
    Summarize,
    Chunk,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PassThrough => "pass_through",
            Self::Paginate => "paginate",
            Self::Summarize => "summarize",
            Self::Chunk => "chunk",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-fatal governance condition. Visible to operators, never an error for the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Delivered response still exceeds the hard cap
    HardCapViolation { estimated_tokens: usize, hard_cap: usize },
    /// Chunker split without a semantic boundary
    BoundaryFallback { chunk_index: usize },
    /// Summarizer had no field profile for this type
    UnconfiguredType { type_name: String },
    /// Expired cursor; paging restarted from the beginning
    CursorExpired,
}

impl Diagnostic {
    /// Short label for headers and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::HardCapViolation { .. } => "hard-cap-violation",
            Self::BoundaryFallback { .. } => "boundary-fallback",
            Self::UnconfiguredType { .. } => "unconfigured-type",
            Self::CursorExpired => "cursor-expired",
        }
    }
}

/// Request-side governance parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GovernParams {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default, alias = "pageSize")]
    pub limit: Option<usize>,
    /// Summarize even when under the threshold
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub summary: bool,
    #[serde(default)]
    pub fields: Option<String>,
}

impl GovernParams {
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_summary(mut self) -> Self {
        self.summary = true;
        self
    }

    pub fn with_fields(mut self, fields: impl Into<String>) -> Self {
        self.fields = Some(fields.into());
        self
    }

    /// Cursor, ignoring empty strings
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref().filter(|c| !c.is_empty())
    }

    /// Client asked for the untruncated object
    pub fn wants_all_fields(&self) -> bool {
        self.fields
            .as_deref()
            .is_some_and(|f| f.trim().eq_ignore_ascii_case(ALL_FIELDS_VALUE))
    }
}

/// Accepts `true`/`false`, `1`/`0`, `yes`/`no`, `on`/`off`; a bare key counts as set
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        None => false,
        Some(Flag::Bool(b)) => b,
        Some(Flag::Int(n)) => n != 0,
        Some(Flag::Text(text)) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "" | "true" | "1" | "yes" | "on"
        ),
    })
}

/// Body actually delivered to the client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Full(Value),
    Page(PaginatedResponse<Value>),
    Summary(SummaryResponse),
    Chunk(ContentChunk),
}

impl ResponseBody {
    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Full(_) => Strategy::PassThrough,
            Self::Page(_) => Strategy::Paginate,
            Self::Summary(_) => Strategy::Summarize,
            Self::Chunk(_) => Strategy::Chunk,
        }
    }

    /// Items in a page or array, otherwise 1
    pub fn item_count(&self) -> usize {
        match self {
            Self::Full(Value::Array(items)) => items.len(),
            Self::Page(page) => page.items.len(),
            Self::Full(_) | Self::Summary(_) | Self::Chunk(_) => 1,
        }
    }
}

/// Governed response plus the decisions behind it
///
/// Serializes as the bare body so wire envelopes stay unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct GovernedResponse {
    pub request_id: Uuid,
    pub body: ResponseBody,
    /// Budget of the body as delivered
    pub budget: TokenBudget,
    /// Estimate of the unmitigated candidate, when it was computed
    pub candidate_tokens: Option<usize>,
    pub diagnostics: Vec<Diagnostic>,
}

impl GovernedResponse {
    pub fn strategy(&self) -> Strategy {
        self.body.strategy()
    }
}

impl Serialize for GovernedResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}
