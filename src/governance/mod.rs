//! Response governance
//!
//! Keeps responses inside a token budget by estimating their size and then
//! paginating lists, summarizing objects or chunking text.

pub mod chunker;
pub mod cursor;
pub mod governor;
pub mod models;
pub mod pagination;
pub mod summarizer;
pub mod token_budget;
pub mod token_estimator;

pub use chunker::{
    BoundaryDetector, ChunkMetadata, Chunker, ContentChunk, ContentKind, LineBoundary,
    LogBoundary, ProseBoundary,
};
pub use cursor::{CursorCodec, ListQuery, OrderKey, SortDirection};
pub use governor::ResponseGovernor;
pub use models::{
    CandidateShape, Diagnostic, GovernParams, GovernedResponse, ResponseBody, Strategy,
};
pub use pagination::{PageMeta, PaginatedResponse, Paginator};
pub use summarizer::{DetailsRequest, Summarizer, SummaryKind, SummaryMeta, SummaryResponse};
pub use token_budget::{TokenBudget, TokenBudgetConfig, TokenBudgetEvaluator};
pub use token_estimator::{CharHeuristicEstimator, TiktokenEstimator, TokenEstimator};
