//! Response governor
//!
//! Runs every candidate response through estimate, strategy selection,
//! mitigation and a final hard-cap check, then emits one telemetry record:
//!
//! ```text
//! candidate -> estimate -> select strategy -> paginate | summarize | chunk | pass
//!           -> re-estimate delivered body -> hard-cap check -> telemetry
//! ```

use super::chunker::{ChunkOutcome, Chunker, ContentKind};
use super::cursor::{CursorCodec, ListQuery};
use super::models::{
    CandidateShape, Diagnostic, GovernParams, GovernedResponse, ResponseBody, Strategy,
};
use super::pagination::Paginator;
use super::summarizer::Summarizer;
use super::token_budget::{TokenBudgetConfig, TokenBudgetEvaluator};
use super::token_estimator::build_estimator;
use crate::config::GovernorConfig;
use crate::error::{GovernanceError, Result};
use crate::telemetry::{keys, TelemetryRecord, TelemetryRecorder};
use indexmap::IndexMap;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Outcome of a strategy before the final hard-cap check
struct Draft {
    body: ResponseBody,
    candidate_tokens: Option<usize>,
    diagnostics: Vec<Diagnostic>,
    metadata: IndexMap<String, Value>,
}

impl Draft {
    fn new(body: ResponseBody, candidate_tokens: Option<usize>) -> Self {
        Self {
            body,
            candidate_tokens,
            diagnostics: Vec::new(),
            metadata: IndexMap::new(),
        }
    }

    fn note(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

/// Applies token governance to list, object and text responses
pub struct ResponseGovernor {
    evaluator: TokenBudgetEvaluator,
    paginator: Paginator,
    summarizer: Summarizer,
    chunker: Chunker,
    recorder: TelemetryRecorder,
}

impl ResponseGovernor {
    /// Build every component from configuration
    pub fn new(config: &GovernorConfig, recorder: TelemetryRecorder) -> Result<Self> {
        config.validate()?;

        let estimator = build_estimator(config.estimator)?;
        let evaluator = TokenBudgetEvaluator::new(TokenBudgetConfig::from(config), estimator)?;
        let codec = CursorCodec::from_config(config)?;

        info!(
            "Response governor ready: threshold={}, hard_cap={}, page_size={}..={}, chunk_bytes={}",
            config.token_threshold,
            config.token_hard_cap,
            config.default_page_size,
            config.max_page_size,
            config.max_chunk_bytes
        );

        Ok(Self {
            evaluator,
            paginator: Paginator::from_config(codec.clone(), config),
            summarizer: Summarizer::from_config(config),
            chunker: Chunker::from_config(codec, config),
            recorder,
        })
    }

    /// Assemble from prebuilt components
    pub fn with_components(
        evaluator: TokenBudgetEvaluator,
        paginator: Paginator,
        summarizer: Summarizer,
        chunker: Chunker,
        recorder: TelemetryRecorder,
    ) -> Self {
        Self {
            evaluator,
            paginator,
            summarizer,
            chunker,
            recorder,
        }
    }

    pub fn evaluator(&self) -> &TokenBudgetEvaluator {
        &self.evaluator
    }

    pub fn paginator(&self) -> &Paginator {
        &self.paginator
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Govern an ordered collection
    ///
    /// A cursor or explicit limit always paginates. Otherwise the collection is
    /// returned whole when it fits the threshold and paginated when it does not.
    pub fn govern_list(
        &self,
        endpoint: &str,
        items: &[Value],
        query: &ListQuery,
        params: &GovernParams,
    ) -> Result<GovernedResponse> {
        let started = Instant::now();
        let draft = self.draft_list(items, query, params);
        self.finish(endpoint, started, draft)
    }

    /// Govern a single object of type `type_name`
    pub fn govern_object(
        &self,
        endpoint: &str,
        type_name: &str,
        object: Value,
        params: &GovernParams,
    ) -> Result<GovernedResponse> {
        let started = Instant::now();
        let draft = self.draft_object(endpoint, type_name, object, params);
        self.finish(endpoint, started, draft)
    }

    /// Govern raw text content
    pub fn govern_text(
        &self,
        endpoint: &str,
        text: &str,
        kind: ContentKind,
        params: &GovernParams,
    ) -> Result<GovernedResponse> {
        let started = Instant::now();
        let draft = self.draft_text(text, kind, params);
        self.finish(endpoint, started, draft)
    }

    fn draft_list(
        &self,
        items: &[Value],
        query: &ListQuery,
        params: &GovernParams,
    ) -> Result<Draft> {
        let explicit = params.cursor().is_some() || params.limit.is_some();

        let candidate_tokens = if explicit {
            None
        } else {
            let candidate = self.evaluator.evaluate_serialized(items)?;
            if candidate.select_strategy(CandidateShape::List) == Strategy::PassThrough {
                debug!(
                    "List of {} items within budget ({} tokens)",
                    items.len(),
                    candidate.estimated_tokens
                );
                return Ok(Draft::new(
                    ResponseBody::Full(Value::Array(items.to_vec())),
                    Some(candidate.estimated_tokens),
                ));
            }
            info!(
                "List of {} items over threshold ({} > {}); paginating",
                items.len(),
                candidate.estimated_tokens,
                candidate.threshold
            );
            Some(candidate.estimated_tokens)
        };

        let start = self.paginator.resolve_start(params.cursor(), query)?;
        let mut page_size = self.paginator.clamp_page_size(params.limit);
        let mut page = self.paginator.page_at(items, start.offset, page_size, query)?;

        let mut shrinks = 0u32;
        while page_size > 1 && self.evaluator.evaluate_serialized(&page)?.exceeds_hard_cap() {
            page_size = (page_size / 2).max(1);
            shrinks += 1;
            page = self.paginator.page_at(items, start.offset, page_size, query)?;
        }
        if shrinks > 0 {
            info!(
                "Page over hard cap; shrank page size {} times to {}",
                shrinks, page_size
            );
        }

        let mut draft = Draft::new(ResponseBody::Page(page), candidate_tokens);
        if start.restarted {
            draft.diagnostics.push(Diagnostic::CursorExpired);
            draft.note(keys::CURSOR_RESTARTED, true);
        }
        draft.note(keys::OFFSET, start.offset);
        draft.note(keys::PAGE_SIZE, page_size);
        if shrinks > 0 {
            draft.note(keys::PAGE_SHRINKS, shrinks);
        }
        Ok(draft)
    }

    fn draft_object(
        &self,
        endpoint: &str,
        type_name: &str,
        object: Value,
        params: &GovernParams,
    ) -> Result<Draft> {
        if params.wants_all_fields() {
            debug!("Full '{}' requested; skipping summarization", type_name);
            let mut draft = Draft::new(ResponseBody::Full(object), None);
            draft.note(keys::ALL_FIELDS_REQUESTED, true);
            return Ok(draft);
        }

        let candidate = self.evaluator.evaluate_json(&object);

        let map = match object {
            Value::Object(map) => map,
            other => {
                let mut draft =
                    Draft::new(ResponseBody::Full(other), Some(candidate.estimated_tokens));
                if params.summary {
                    debug!("Summary requested for non-object '{}'; returned as is", type_name);
                    draft.note(keys::SUMMARY_REQUESTED, true);
                }
                return Ok(draft);
            }
        };

        let strategy = if params.summary {
            Strategy::Summarize
        } else {
            candidate.select_strategy(CandidateShape::Object)
        };

        if strategy == Strategy::PassThrough {
            return Ok(Draft::new(
                ResponseBody::Full(Value::Object(map)),
                Some(candidate.estimated_tokens),
            ));
        }

        info!(
            "Summarizing '{}' ({} tokens, threshold {}, requested={})",
            type_name, candidate.estimated_tokens, candidate.threshold, params.summary
        );

        let outcome = self.summarizer.summarize(type_name, endpoint, &map);
        let projected = outcome.response.meta.projected_fields.len();
        let total = outcome.response.meta.total_fields;

        let mut draft = Draft::new(
            ResponseBody::Summary(outcome.response),
            Some(candidate.estimated_tokens),
        );
        draft.note(keys::PROJECTED_FIELDS, projected);
        draft.note(keys::TOTAL_FIELDS, total);
        if params.summary {
            draft.note(keys::SUMMARY_REQUESTED, true);
        }
        if outcome.unconfigured {
            draft.diagnostics.push(Diagnostic::UnconfiguredType {
                type_name: type_name.to_string(),
            });
            draft.note(keys::UNCONFIGURED_TYPE, type_name);
        }
        if outcome.missing_identifier {
            draft.note(keys::MISSING_IDENTIFIER, true);
        }
        Ok(draft)
    }

    fn draft_text(&self, text: &str, kind: ContentKind, params: &GovernParams) -> Result<Draft> {
        let candidate_tokens = match params.cursor() {
            Some(_) => None,
            None => {
                let candidate = self.evaluator.evaluate_serialized(text)?;
                if candidate.select_strategy(CandidateShape::Text) == Strategy::PassThrough {
                    return Ok(Draft::new(
                        ResponseBody::Full(Value::String(text.to_string())),
                        Some(candidate.estimated_tokens),
                    ));
                }
                info!(
                    "Text of {} bytes over threshold ({} > {}); chunking",
                    text.len(),
                    candidate.estimated_tokens,
                    candidate.threshold
                );
                Some(candidate.estimated_tokens)
            }
        };

        let (chunker, shrinks) = self.chunker_within_cap(text, kind)?;
        let ChunkOutcome {
            chunk,
            boundary_fallback,
            restarted,
        } = chunker.chunk(text, kind, params.cursor())?;

        let chunk_index = chunk.chunk_index;
        let total_chunks = chunk.total_chunks;
        let mut draft = Draft::new(ResponseBody::Chunk(chunk), candidate_tokens);

        if shrinks > 0 {
            draft.note(keys::CHUNK_BYTES, chunker.max_bytes());
            draft.note(keys::CHUNK_SHRINKS, shrinks);
        }
        if boundary_fallback {
            draft.diagnostics.push(Diagnostic::BoundaryFallback { chunk_index });
            draft.note(keys::BOUNDARY_FALLBACK, true);
        }
        if restarted {
            draft.diagnostics.push(Diagnostic::CursorExpired);
            draft.note(keys::CURSOR_RESTARTED, true);
        }
        draft.note(keys::CHUNK_INDEX, chunk_index);
        draft.note(keys::TOTAL_CHUNKS, total_chunks);
        draft.note(keys::CONTENT_KIND, serde_json::to_value(kind)?);
        Ok(draft)
    }

    /// Chunker whose every chunk of `text` serializes under the hard cap
    ///
    /// Escaped content (control characters become `\u00XX`) can take several
    /// times its byte length on the wire, so the chunk size is halved until no
    /// planned chunk is over the cap or chunks are a single byte. The result
    /// depends only on the text and configuration, so follow-up cursors see the
    /// same layout.
    fn chunker_within_cap(&self, text: &str, kind: ContentKind) -> Result<(Chunker, u32)> {
        if !self.evaluator.evaluate_serialized(text)?.exceeds_hard_cap() {
            return Ok((self.chunker.clone(), 0));
        }

        let mut chunker = self.chunker.clone();
        let mut shrinks = 0u32;
        while chunker.max_bytes() > 1 && self.plan_exceeds_hard_cap(&chunker, text, kind)? {
            chunker = chunker.resized(chunker.max_bytes() / 2);
            shrinks += 1;
        }
        if shrinks > 0 {
            info!(
                "{} chunks over hard cap; shrank chunk size {} times to {} bytes",
                kind.detector().name(),
                shrinks,
                chunker.max_bytes()
            );
        }
        Ok((chunker, shrinks))
    }

    fn plan_exceeds_hard_cap(
        &self,
        chunker: &Chunker,
        text: &str,
        kind: ContentKind,
    ) -> Result<bool> {
        for span in chunker.plan(text, kind.detector()) {
            if self
                .evaluator
                .evaluate_serialized(&text[span.start..span.end])?
                .exceeds_hard_cap()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Hard-cap check on the delivered body, then telemetry
    fn finish(
        &self,
        endpoint: &str,
        started: Instant,
        draft: Result<Draft>,
    ) -> Result<GovernedResponse> {
        let draft = match draft {
            Ok(draft) => draft,
            Err(e) => return Err(self.record_failure(endpoint, started, e)),
        };

        let wire = match serde_json::to_string(&draft.body) {
            Ok(wire) => wire,
            Err(e) => return Err(self.record_failure(endpoint, started, e.into())),
        };

        let budget = self.evaluator.evaluate(&wire);
        let strategy = draft.body.strategy();
        let mut diagnostics = draft.diagnostics;

        if budget.exceeds_hard_cap() {
            error!(
                "Governed response for {} exceeds hard cap after {}: {} > {} tokens",
                endpoint, strategy, budget.estimated_tokens, budget.hard_cap
            );
            diagnostics.push(Diagnostic::HardCapViolation {
                estimated_tokens: budget.estimated_tokens,
                hard_cap: budget.hard_cap,
            });
        }

        let mut record = TelemetryRecord::new(endpoint, strategy);
        record.estimated_tokens = budget.estimated_tokens;
        record.response_bytes = wire.len();
        record.item_count = draft.body.item_count();
        record.diagnostics = diagnostics.clone();
        record.optimization_metadata = draft.metadata;
        record
            .optimization_metadata
            .insert(keys::BUDGET_USED.to_string(), budget.budget_used().into());
        if let Some(tokens) = draft.candidate_tokens {
            record
                .optimization_metadata
                .insert(keys::CANDIDATE_TOKENS.to_string(), tokens.into());
        }
        record.latency_ms = started.elapsed().as_millis() as u64;

        let response = GovernedResponse {
            request_id: record.request_id,
            body: draft.body,
            budget,
            candidate_tokens: draft.candidate_tokens,
            diagnostics,
        };

        debug!(
            "Governed {} via {} ({} tokens, {} bytes)",
            endpoint, strategy, budget.estimated_tokens, record.response_bytes
        );
        self.recorder.record(record);
        Ok(response)
    }

    /// Record a rejected request and hand the error back
    fn record_failure(
        &self,
        endpoint: &str,
        started: Instant,
        error: GovernanceError,
    ) -> GovernanceError {
        if error.is_client_error() {
            warn!("Rejected request for {}: {}", endpoint, error);
        } else {
            error!("Governance failed for {}: {}", endpoint, error);
        }

        let mut record = TelemetryRecord::new(endpoint, Strategy::PassThrough)
            .with_metadata(keys::ERROR_CODE, error.error_code());
        if let GovernanceError::InvalidCursor(rejection) = &error {
            record = record.with_metadata(keys::CURSOR_REJECTION, rejection.as_str());
        }
        record.latency_ms = started.elapsed().as_millis() as u64;
        self.recorder.record(record);

        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldProfile;
    use crate::error::CursorRejection;
    use crate::governance::cursor::OrderKey;
    use crate::governance::summarizer::SummaryKind;
    use secrecy::SecretString;
    use serde_json::json;

    fn config() -> GovernorConfig {
        let mut config = GovernorConfig::default();
        config.cursor_secret = Some(SecretString::new("governor-test".to_string()));
        config
            .essential_fields
            .insert("unit".to_string(), FieldProfile::new(["name", "status"]));
        config
    }

    fn governor() -> ResponseGovernor {
        ResponseGovernor::new(&config(), TelemetryRecorder::disabled()).unwrap()
    }

    fn by_id() -> ListQuery {
        ListQuery::new(OrderKey::asc("id"))
    }

    fn units(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| json!({"id": i, "name": format!("Unit {}", i), "status": "vacant"}))
            .collect()
    }

    #[test]
    fn test_small_list_passes_through() {
        let response = governor()
            .govern_list("/units", &units(3), &by_id(), &GovernParams::default())
            .unwrap();
        assert_eq!(response.strategy(), Strategy::PassThrough);
        assert_eq!(response.body.item_count(), 3);
        assert!(response.diagnostics.is_empty());
        assert!(response.candidate_tokens.is_some());
    }

    #[test]
    fn test_explicit_limit_paginates() {
        let response = governor()
            .govern_list(
                "/units",
                &units(30),
                &by_id(),
                &GovernParams::default().with_limit(10),
            )
            .unwrap();
        match &response.body {
            ResponseBody::Page(page) => {
                assert_eq!(page.items.len(), 10);
                assert!(page.meta.has_more);
            }
            other => panic!("expected page, got {:?}", other),
        }
        assert!(response.candidate_tokens.is_none());
    }

    #[test]
    fn test_large_list_paginates() {
        // ~45 tokens per item; 500 items is well over 4000
        let response = governor()
            .govern_list("/units", &units(500), &by_id(), &GovernParams::default())
            .unwrap();
        assert_eq!(response.strategy(), Strategy::Paginate);
        assert!(!response.budget.exceeds_hard_cap());
    }

    #[test]
    fn test_oversized_items_shrink_page() {
        let mut config = config();
        config.token_threshold = 100;
        config.token_hard_cap = 500;
        let governor = ResponseGovernor::new(&config, TelemetryRecorder::disabled()).unwrap();

        // Each item is ~300 tokens, so only one fits under the hard cap
        let items: Vec<Value> = (0..10)
            .map(|i| json!({"id": i, "blob": "x".repeat(1000)}))
            .collect();
        let response = governor
            .govern_list("/blobs", &items, &by_id(), &GovernParams::default())
            .unwrap();

        match &response.body {
            ResponseBody::Page(page) => assert_eq!(page.items.len(), 1),
            other => panic!("expected page, got {:?}", other),
        }
        assert!(response.diagnostics.is_empty());
    }

    #[test]
    fn test_single_item_over_cap_is_flagged() {
        let mut config = config();
        config.token_threshold = 100;
        config.token_hard_cap = 200;
        let governor = ResponseGovernor::new(&config, TelemetryRecorder::disabled()).unwrap();

        let items = vec![json!({"id": 1, "blob": "x".repeat(2000)})];
        let response = governor
            .govern_list("/blobs", &items, &by_id(), &GovernParams::default())
            .unwrap();

        assert!(response.budget.exceeds_hard_cap());
        assert!(matches!(
            response.diagnostics.as_slice(),
            [Diagnostic::HardCapViolation { .. }]
        ));
    }

    #[test]
    fn test_invalid_cursor_rejected() {
        let err = governor()
            .govern_list(
                "/units",
                &units(10),
                &by_id(),
                &GovernParams::default().with_cursor("not-a-cursor"),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            GovernanceError::InvalidCursor(CursorRejection::Malformed)
        ));
    }

    #[test]
    fn test_summary_requested_under_threshold() {
        let object = json!({"id": "u1", "name": "Unit 1", "status": "let", "floor": 3});
        let response = governor()
            .govern_object("/units/u1", "unit", object, &GovernParams::default().with_summary())
            .unwrap();

        match &response.body {
            ResponseBody::Summary(summary) => {
                assert_eq!(summary.meta.kind, SummaryKind::Preview);
                assert_eq!(summary.meta.projected_fields, vec!["id", "name", "status"]);
            }
            other => panic!("expected summary, got {:?}", other),
        }
    }

    #[test]
    fn test_all_fields_bypasses_summary() {
        let object = json!({"id": "u1", "name": "Unit 1", "floor": 3});
        let response = governor()
            .govern_object(
                "/units/u1",
                "unit",
                object.clone(),
                &GovernParams::default().with_summary().with_fields("all"),
            )
            .unwrap();
        assert_eq!(response.body, ResponseBody::Full(object));
    }

    #[test]
    fn test_summary_of_scalar_is_noop() {
        let response = governor()
            .govern_object("/count", "count", json!(42), &GovernParams::default().with_summary())
            .unwrap();
        assert_eq!(response.body, ResponseBody::Full(json!(42)));
        assert_eq!(response.strategy(), Strategy::PassThrough);
    }

    #[test]
    fn test_unconfigured_type_flagged() {
        let object = json!({"id": 7, "rent": 1200});
        let response = governor()
            .govern_object("/leases/7", "lease", object, &GovernParams::default().with_summary())
            .unwrap();
        match &response.body {
            ResponseBody::Summary(summary) => {
                let details = &summary.meta.details_available;
                assert_eq!(details.endpoint, "/leases/7");
                assert_eq!(details.parameters["id"], 7);
            }
            other => panic!("expected summary, got {:?}", other),
        }
        assert_eq!(
            response.diagnostics,
            vec![Diagnostic::UnconfiguredType {
                type_name: "lease".to_string()
            }]
        );
    }

    #[test]
    fn test_small_text_passes_and_large_text_chunks() {
        let governor = governor();
        let small = governor
            .govern_text("/logs", "one line\n", ContentKind::Log, &GovernParams::default())
            .unwrap();
        assert_eq!(small.body, ResponseBody::Full(json!("one line\n")));

        let large = "2024-01-01 INFO started\n".repeat(2000);
        let response = governor
            .govern_text("/logs", &large, ContentKind::Log, &GovernParams::default())
            .unwrap();
        match &response.body {
            ResponseBody::Chunk(chunk) => {
                assert_eq!(chunk.chunk_index, 0);
                assert!(chunk.total_chunks > 1);
                assert!(chunk.next_cursor.is_some());
                assert!(chunk.content.ends_with('\n'));
            }
            other => panic!("expected chunk, got {:?}", other),
        }
    }

    #[test]
    fn test_escaped_text_shrinks_chunks_under_cap() {
        let mut config = config();
        config.token_threshold = 200;
        config.token_hard_cap = 2000;
        config.max_chunk_bytes = 2400;
        let governor = ResponseGovernor::new(&config, TelemetryRecorder::disabled()).unwrap();

        // Each control character is written as \u0001 on the wire
        let text = "\u{1}".repeat(3000);
        let mut rebuilt = String::new();
        let mut params = GovernParams::default();
        let mut expected_index = 0;
        loop {
            let response = governor
                .govern_text("/dumps/1", &text, ContentKind::Lines, &params)
                .unwrap();
            assert!(!response.budget.exceeds_hard_cap());
            // the last chunk is the remainder, not a split
            let expected = if expected_index < 4 {
                vec![Diagnostic::BoundaryFallback {
                    chunk_index: expected_index,
                }]
            } else {
                Vec::new()
            };
            assert_eq!(response.diagnostics, expected);

            let chunk = match &response.body {
                ResponseBody::Chunk(chunk) => chunk.clone(),
                other => panic!("expected chunk, got {:?}", other),
            };
            assert_eq!(chunk.chunk_index, expected_index);
            assert_eq!(chunk.total_chunks, 5);
            assert_eq!(chunk.content.len(), 600);
            rebuilt.push_str(&chunk.content);
            expected_index += 1;
            match chunk.next_cursor {
                Some(next) => params = GovernParams::default().with_cursor(next),
                None => break,
            }
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_text_over_cap_at_smallest_chunk_is_flagged() {
        let mut config = config();
        config.token_threshold = 1;
        config.token_hard_cap = 1;
        let governor = ResponseGovernor::new(&config, TelemetryRecorder::disabled()).unwrap();

        let text = "Short note. ".repeat(8);
        let response = governor
            .govern_text("/notes/1", &text, ContentKind::Prose, &GovernParams::default())
            .unwrap();

        match &response.body {
            ResponseBody::Chunk(chunk) => assert_eq!(chunk.content.len(), 1),
            other => panic!("expected chunk, got {:?}", other),
        }
        assert!(response.budget.exceeds_hard_cap());
        assert!(response
            .diagnostics
            .contains(&Diagnostic::BoundaryFallback { chunk_index: 0 }));
        assert!(response
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::HardCapViolation { hard_cap: 1, .. })));
    }
}
