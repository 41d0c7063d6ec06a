//! End-to-end tests for response governance
//!
//! These drive `ResponseGovernor` the way an API handler would and check the
//! delivered envelopes, cursor handling and telemetry.

use chrono::{Duration, Utc};
use response_governor::{
    governance::{
        cursor::{CursorPayload, CURSOR_VERSION},
        CursorCodec, SummaryKind,
    },
    prelude::*,
    telemetry::{keys, MemorySink},
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;

fn config() -> GovernorConfig {
    let mut config = GovernorConfig::default();
    config.cursor_secret = Some(SecretString::new("end-to-end-secret".to_string()));
    config.essential_fields.insert(
        "listing".to_string(),
        FieldProfile::new(["field_01", "field_02", "field_03"])
            .with_details_endpoint("/api/v1/listings/get"),
    );
    config
}

fn governor() -> ResponseGovernor {
    ResponseGovernor::new(&config(), TelemetryRecorder::disabled()).unwrap()
}

fn codec() -> CursorCodec {
    CursorCodec::from_config(&config()).unwrap()
}

fn query() -> ListQuery {
    ListQuery::new(OrderKey::asc("id")).with_filter("city", "Portland")
}

fn collection(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| json!({"id": i, "name": format!("Listing {}", i), "beds": i % 4}))
        .collect()
}

fn page_of(response: &GovernedResponse) -> &response_governor::governance::PaginatedResponse<Value> {
    match &response.body {
        ResponseBody::Page(page) => page,
        other => panic!("expected a page, got {:?}", other),
    }
}

#[test]
fn test_first_page_of_500() {
    let items = collection(500);
    let response = governor()
        .govern_list("/listings", &items, &query(), &GovernParams::default().with_limit(50))
        .unwrap();

    let page = page_of(&response);
    assert_eq!(page.items.len(), 50);
    assert!(page.meta.has_more);
    assert_eq!(page.meta.total_count, 500);

    let cursor = page.next_cursor.as_deref().unwrap();
    let offset = codec()
        .decode(cursor, &query().order_key, &query().fingerprint())
        .unwrap();
    assert_eq!(offset, 50);
}

#[test]
fn test_last_page_of_500() {
    let items = collection(500);
    let cursor = codec()
        .encode(450, &query().order_key, &query().fingerprint())
        .unwrap();

    let response = governor()
        .govern_list(
            "/listings",
            &items,
            &query(),
            &GovernParams::default().with_limit(50).with_cursor(cursor),
        )
        .unwrap();

    let page = page_of(&response);
    assert_eq!(page.items.len(), 50);
    assert!(!page.meta.has_more);
    assert!(page.next_cursor.is_none());
    assert_eq!(page.items[0]["id"], 450);

    let wire = serde_json::to_value(&response).unwrap();
    assert!(wire["nextCursor"].is_null());
}

#[test]
fn test_following_cursors_visits_every_item_once() {
    let items = collection(137);
    let governor = governor();
    let mut seen = Vec::new();
    let mut params = GovernParams::default().with_limit(25);
    let mut pages = 0;

    loop {
        let response = governor.govern_list("/listings", &items, &query(), &params).unwrap();
        let page = page_of(&response);
        pages += 1;
        seen.extend(page.items.iter().cloned());
        match &page.next_cursor {
            Some(next) => params = GovernParams::default().with_limit(25).with_cursor(next.clone()),
            None => break,
        }
    }

    assert_eq!(pages, 6);
    assert_eq!(seen, items);
}

#[test]
fn test_negative_offset_cursor_rejected() {
    let forged = codec()
        .seal(&CursorPayload {
            version: CURSOR_VERSION,
            offset: -5,
            created_at: Utc::now(),
            order_key: query().order_key.to_string(),
            filter_fingerprint: query().fingerprint(),
        })
        .unwrap();

    let err = governor()
        .govern_list(
            "/listings",
            &collection(100),
            &query(),
            &GovernParams::default().with_cursor(forged),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        GovernanceError::InvalidCursor(CursorRejection::NegativeOffset)
    ));
}

#[test]
fn test_tampered_cursor_rejected() {
    let cursor = codec()
        .encode(50, &query().order_key, &query().fingerprint())
        .unwrap();
    let mut tampered: Vec<char> = cursor.chars().collect();
    let i = tampered.len() - 10;
    tampered[i] = if tampered[i] == 'A' { 'B' } else { 'A' };
    let tampered: String = tampered.into_iter().collect();

    let err = governor()
        .govern_list(
            "/listings",
            &collection(100),
            &query(),
            &GovernParams::default().with_cursor(tampered),
        )
        .unwrap_err();
    assert!(matches!(err, GovernanceError::InvalidCursor(_)));
}

#[test]
fn test_cursor_for_other_filters_rejected() {
    let cursor = codec()
        .encode(50, &query().order_key, &query().fingerprint())
        .unwrap();
    let other = ListQuery::new(OrderKey::asc("id")).with_filter("city", "Salem");

    let err = governor()
        .govern_list(
            "/listings",
            &collection(100),
            &other,
            &GovernParams::default().with_cursor(cursor),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        GovernanceError::InvalidCursor(CursorRejection::QueryMismatch)
    ));
}

#[test]
fn test_expired_cursor_fails_decode_and_restarts_paging() {
    let stale = codec()
        .encode_at(
            100,
            &query().order_key,
            &query().fingerprint(),
            Utc::now() - Duration::seconds(601),
        )
        .unwrap();

    let err = codec()
        .decode(&stale, &query().order_key, &query().fingerprint())
        .unwrap_err();
    assert!(matches!(err, GovernanceError::ExpiredCursor { .. }));

    let response = governor()
        .govern_list(
            "/listings",
            &collection(300),
            &query(),
            &GovernParams::default().with_limit(50).with_cursor(stale),
        )
        .unwrap();
    assert_eq!(page_of(&response).items[0]["id"], 0);
    assert_eq!(response.diagnostics, vec![Diagnostic::CursorExpired]);
}

#[test]
fn test_large_object_is_summarized() {
    let mut object = serde_json::Map::new();
    object.insert("id".to_string(), json!("listing-9"));
    for i in 1..50 {
        object.insert(format!("field_{:02}", i), json!("v".repeat(400)));
    }
    assert_eq!(object.len(), 50);
    let object = Value::Object(object);

    let governor = governor();
    let candidate = governor.evaluator().evaluate_json(&object);
    assert!(candidate.estimated_tokens > 4000 && candidate.estimated_tokens < 12000);

    let response = governor
        .govern_object("/listings/listing-9", "Listing", object, &GovernParams::default())
        .unwrap();

    let summary = match &response.body {
        ResponseBody::Summary(summary) => summary,
        other => panic!("expected a summary, got {:?}", other),
    };
    assert_eq!(summary.meta.kind, SummaryKind::Preview);
    assert!(summary.meta.projected_fields.len() < 50);
    assert_eq!(summary.meta.projected_fields[0], "id");
    assert_eq!(summary.meta.total_fields, 50);
    assert_eq!(summary.meta.details_available.endpoint, "/api/v1/listings/get");
    assert_eq!(summary.meta.details_available.parameters["id"], "listing-9");
    assert_eq!(summary.meta.details_available.parameters["fields"], "all");

    let wire = serde_json::to_value(&response).unwrap();
    assert_eq!(wire["meta"]["kind"], "preview");
    assert!(wire["summary"]["field_01"].is_string());
}

#[test]
fn test_chunked_text_reassembles() {
    let mut config = config();
    config.max_chunk_bytes = 2000;
    config.token_threshold = 200;
    config.token_hard_cap = 2000;
    let governor = ResponseGovernor::new(&config, TelemetryRecorder::disabled()).unwrap();

    let text: String = (0..300)
        .map(|i| format!("Paragraph {} describes the building. It has {} floors.\n\n", i, i % 9))
        .collect();

    let mut rebuilt = String::new();
    let mut params = GovernParams::default();
    let mut expected_index = 0;
    loop {
        let response = governor
            .govern_text("/reports/1", &text, ContentKind::Prose, &params)
            .unwrap();
        let chunk = match &response.body {
            ResponseBody::Chunk(chunk) => chunk.clone(),
            other => panic!("expected a chunk, got {:?}", other),
        };
        assert_eq!(chunk.chunk_index, expected_index);
        assert!(chunk.content.len() <= 2000);
        expected_index += 1;
        rebuilt.push_str(&chunk.content);
        match chunk.next_cursor {
            Some(next) => params = GovernParams::default().with_cursor(next),
            None => break,
        }
    }

    assert_eq!(rebuilt, text);
}

#[tokio::test]
async fn test_one_telemetry_record_per_request() {
    let memory = Arc::new(MemorySink::new());
    let (recorder, worker) = TelemetryRecorder::spawn(vec![memory.clone()], 64);
    let governor = ResponseGovernor::new(&config(), recorder).unwrap();

    let items = collection(500);
    governor
        .govern_list("/listings", &items, &query(), &GovernParams::default())
        .unwrap();
    governor
        .govern_list("/listings", &collection(2), &query(), &GovernParams::default())
        .unwrap();
    governor
        .govern_object(
            "/listings/1",
            "unknown_type",
            json!({"id": 1, "a": 1}),
            &GovernParams::default().with_summary(),
        )
        .unwrap();
    let lease = governor
        .govern_object(
            "/api/v1/leases/7",
            "lease",
            json!({"id": 7, "rent": 1200}),
            &GovernParams::default().with_summary(),
        )
        .unwrap();
    match &lease.body {
        ResponseBody::Summary(summary) => {
            let details = &summary.meta.details_available;
            assert_eq!(details.endpoint, "/api/v1/leases/7");
            assert_eq!(details.parameters["id"], 7);
            assert_eq!(details.parameters["fields"], "all");
        }
        other => panic!("expected a summary, got {:?}", other),
    }
    governor
        .govern_text(
            "/logs",
            &"2024-01-01 INFO tick\n".repeat(3000),
            ContentKind::Log,
            &GovernParams::default(),
        )
        .unwrap();
    governor
        .govern_list(
            "/listings",
            &items,
            &query(),
            &GovernParams::default().with_cursor("garbage"),
        )
        .unwrap_err();

    drop(governor);
    worker.await.unwrap();

    let records = memory.records();
    assert_eq!(records.len(), 6);
    for record in &records {
        assert!(!(record.pagination_used() && record.chunking_used()));
    }

    assert_eq!(records[0].strategy(), Strategy::Paginate);
    assert!(records[0].pagination_used());
    assert_eq!(records[0].item_count, 50);
    assert!(records[0].optimization_metadata.contains_key(keys::CANDIDATE_TOKENS));

    assert_eq!(records[1].strategy(), Strategy::PassThrough);
    assert_eq!(records[1].item_count, 2);

    assert!(records[2].summarization_used());
    assert_eq!(
        records[2].diagnostics,
        vec![Diagnostic::UnconfiguredType {
            type_name: "unknown_type".to_string()
        }]
    );

    assert!(records[3].summarization_used());

    assert!(records[4].chunking_used());
    assert_eq!(records[4].optimization_metadata[keys::CHUNK_INDEX], 0);

    assert_eq!(records[5].optimization_metadata[keys::ERROR_CODE], "INVALID_CURSOR");
    assert_eq!(records[5].optimization_metadata[keys::CURSOR_REJECTION], "malformed");
}
