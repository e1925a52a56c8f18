//! Collector Tests
//!
//! Acceptance scenarios, chain linkage, tamper detection, crash recovery
//! and concurrent appends against the collector and its HTTP surface.

use audit_chain::audit::entry::GENESIS_PREVIOUS_HMAC;
use audit_chain::audit::verify::{verify_chain, verify_ledger, BreakKind};
use audit_chain::audit::LogRequest;
use audit_chain::collector::{self, LogCollector};
use audit_chain::error::ChainError;
use audit_chain::ledger::Ledger;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::tempdir;
use tower::ServiceExt;

mod common;
use common::*;

async fn post_log(app: &Router, level: &str, request: &LogRequest) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/log/{}", level))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(request).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    read_json(response).await
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    read_json(response).await
}

async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_fresh_boot_accepts_first_entry() {
    let app = collector::router(setup_test_collector().await);

    let (status, body) = get_json(&app, "/current-sequence-number").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currentSequenceNumber"], 0);

    let (status, body) = post_log(&app, "info", &signed_request(1, "boot")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "logged");
    assert_eq!(body["log"]["sequenceNumber"], 1);
    assert_eq!(body["log"]["previousHMAC"], GENESIS_PREVIOUS_HMAC);
    assert!(body["log"]["blockHMAC"].as_str().unwrap().len() == 64);

    let (_, body) = get_json(&app, "/current-sequence-number").await;
    assert_eq!(body["currentSequenceNumber"], 1);
}

#[tokio::test]
async fn test_replayed_request_is_rejected() {
    let app = collector::router(setup_test_collector().await);
    let boot = signed_request(1, "boot");

    let (status, _) = post_log(&app, "info", &boot).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_log(&app, "info", &boot).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid sequence number");
}

#[tokio::test]
async fn test_forged_request_is_rejected() {
    let collector = setup_test_collector().await;
    append_entries(&collector, 1).await;
    let app = collector::router(collector.clone());

    let forged = LogRequest::signed(2, sample_payload("forged"), b"wrong-secret");
    let (status, body) = post_log(&app, "warn", &forged).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid signature");
    assert_eq!(collector.current_sequence_number().await, 1);
    assert_eq!(collector.ledger().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_chain_links_and_sequence_are_contiguous() {
    let collector = setup_test_collector().await;
    append_entries(&collector, 10).await;

    let entries = collector.ledger().all().await.unwrap();
    let numbers: Vec<u64> = entries.iter().map(|e| e.sequence_number).collect();
    assert_eq!(numbers, (1..=10).collect::<Vec<u64>>());

    assert_eq!(entries[0].previous_hmac, GENESIS_PREVIOUS_HMAC);
    for pair in entries.windows(2) {
        assert_eq!(pair[1].previous_hmac, pair[0].block_hmac);
    }

    assert!(verify_chain(&entries, &test_keys()).is_valid);
}

#[tokio::test]
async fn test_adjacency_only_detection_on_write() {
    let collector = setup_test_collector().await;
    append_entries(&collector, 5).await;
    let ledger = collector.ledger().clone();
    let original_third = ledger.get(3).await.unwrap().unwrap();

    tamper_payload(&ledger, 3, &sample_payload("rewritten history")).await;

    // Per-write validation only inspects entry 5, so entry 6 is still accepted.
    let sixth = collector
        .append_entry(signed_request(6, "after tamper"))
        .await
        .unwrap();
    assert_eq!(sixth.previous_hmac, ledger.get(5).await.unwrap().unwrap().block_hmac);

    // The full walk locates the alteration.
    let tampered_third = ledger.get(3).await.unwrap().unwrap();
    let fourth = ledger.get(4).await.unwrap().unwrap();
    let keys = test_keys();
    assert_eq!(
        original_third.compute_block_hmac(keys.collector_secret()),
        fourth.previous_hmac
    );
    assert_ne!(
        tampered_third.compute_block_hmac(keys.collector_secret()),
        fourth.previous_hmac
    );

    let report = verify_ledger(&ledger, &keys).await.unwrap();
    assert!(!report.is_valid);
    assert_eq!(report.entry_count, 6);
    assert_eq!(report.first_break.unwrap().sequence_number, 3);
    assert!(report
        .breaks
        .iter()
        .any(|b| b.sequence_number == 4 && b.kind == BreakKind::LinkMismatch));
}

#[tokio::test]
async fn test_tampered_tail_blocks_next_append() {
    let collector = setup_test_collector().await;
    append_entries(&collector, 3).await;
    let ledger = collector.ledger().clone();

    tamper_payload(&ledger, 3, &sample_payload("rewritten tail")).await;

    let err = collector
        .append_entry(signed_request(4, "next"))
        .await
        .unwrap_err();

    assert_eq!(err, ChainError::ChainLinkMismatch);
    assert_eq!(collector.current_sequence_number().await, 3);
    assert_eq!(ledger.count().await.unwrap(), 3);

    let app = collector::router(collector);
    let (status, body) = post_log(&app, "info", &signed_request(4, "next")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid previousHMAC");
}

#[tokio::test]
async fn test_undecodable_tail_is_a_link_mismatch() {
    let collector = setup_test_collector().await;
    append_entries(&collector, 3).await;
    let ledger = collector.ledger().clone();

    tamper_column(&ledger, 3, "log", "not json").await;

    let err = collector
        .append_entry(signed_request(4, "next"))
        .await
        .unwrap_err();
    assert_eq!(err, ChainError::ChainLinkMismatch);
    assert_eq!(collector.current_sequence_number().await, 3);

    let app = collector::router(collector.clone());
    let (status, body) = post_log(&app, "info", &signed_request(4, "next")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid previousHMAC");

    tamper_column(&ledger, 3, "log", "{}").await;
    tamper_column(&ledger, 3, "timestamp", "yesterday").await;
    let err = collector
        .append_entry(signed_request(4, "next"))
        .await
        .unwrap_err();
    assert_eq!(err, ChainError::ChainLinkMismatch);
    assert_eq!(ledger.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_sequence_ahead_of_tail_is_rejected() {
    let collector = setup_test_collector().await;
    append_entries(&collector, 1).await;
    let tail = collector.chain_tail().await;

    let err = collector
        .append_entry(signed_request(3, "skipped ahead"))
        .await
        .unwrap_err();
    assert_eq!(err, ChainError::SequenceMismatch { expected: 2, got: 3 });

    let app = collector::router(collector.clone());
    let (status, body) = post_log(&app, "info", &signed_request(3, "skipped ahead")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid sequence number");

    assert_eq!(collector.ledger().count().await.unwrap(), 1);
    assert_eq!(collector.chain_tail().await, tail);
}

#[tokio::test]
async fn test_restart_recovers_tail_from_ledger() {
    let temp_dir = tempdir().unwrap();
    let url = format!("sqlite://{}", temp_dir.path().join("audit.db").display());

    let before = {
        let ledger = Ledger::connect(&url).await.unwrap();
        let collector = LogCollector::recover(ledger.clone(), test_keys()).await.unwrap();
        append_entries(&collector, 3).await;
        let tail = collector.chain_tail().await;
        ledger.close().await;
        tail
    };

    let ledger = Ledger::connect(&url).await.unwrap();
    let collector = LogCollector::recover(ledger, test_keys()).await.unwrap();

    assert_eq!(collector.chain_tail().await, before);
    assert_eq!(collector.current_sequence_number().await, 3);

    let fourth = collector
        .append_entry(signed_request(4, "after restart"))
        .await
        .unwrap();
    assert_eq!(fourth.previous_hmac, before.block_hmac);
}

#[tokio::test]
async fn test_concurrent_duplicates_have_one_winner() {
    let collector = setup_test_collector().await;

    let mut handles = Vec::new();
    for i in 0..16 {
        let collector = collector.clone();
        handles.push(tokio::spawn(async move {
            collector
                .append_entry(signed_request(1, &format!("racer {}", i)))
                .await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(err) => assert_eq!(err, ChainError::SequenceMismatch { expected: 2, got: 1 }),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(collector.ledger().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_writers_retrying_fresh_stay_gapless() {
    let collector = setup_test_collector().await;

    let mut handles = Vec::new();
    for writer in 0..8 {
        let collector = collector.clone();
        handles.push(tokio::spawn(async move {
            for attempt in 0..100 {
                let next = collector.current_sequence_number().await + 1;
                let request = signed_request(next, &format!("writer {} attempt {}", writer, attempt));
                match collector.append_entry(request).await {
                    Ok(entry) => return entry.sequence_number,
                    Err(ChainError::SequenceMismatch { .. }) => tokio::task::yield_now().await,
                    Err(other) => panic!("unexpected rejection: {}", other),
                }
            }
            panic!("writer {} never got a slot", writer);
        }));
    }

    let mut assigned = Vec::new();
    for handle in handles {
        assigned.push(handle.await.unwrap());
    }
    assigned.sort_unstable();

    assert_eq!(assigned, (1..=8).collect::<Vec<u64>>());
    let entries = collector.ledger().all().await.unwrap();
    assert!(verify_chain(&entries, &test_keys()).is_valid);
}

#[tokio::test]
async fn test_storage_failure_is_500_and_keeps_state() {
    let collector = setup_test_collector().await;
    collector.ledger().close().await;

    let err = collector
        .append_entry(signed_request(1, "boot"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::StorageFailure(_)));
    assert_eq!(collector.current_sequence_number().await, 0);

    let app = collector::router(collector);
    let (status, body) = post_log(&app, "error", &signed_request(1, "boot")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "failed to log message");
}

#[tokio::test]
async fn test_unredacted_payload_is_not_persisted() {
    let collector = setup_test_collector().await;

    let leaky = LogRequest::signed(
        1,
        json!({"level": "info", "message": "login", "metadata": {"password": "hunter2"}}),
        SECRET_A.as_bytes(),
    );
    let err = collector.append_entry(leaky).await.unwrap_err();
    assert_eq!(err, ChainError::SignatureMismatch);
    assert_eq!(collector.ledger().count().await.unwrap(), 0);

    let redacted = LogRequest::signed(
        1,
        json!({"level": "info", "message": "login", "metadata": {"password": "***REDACTED***"}}),
        SECRET_A.as_bytes(),
    );
    let entry = collector.append_entry(redacted).await.unwrap();
    assert_eq!(entry.log["metadata"]["password"], "***REDACTED***");
}

#[tokio::test]
async fn test_entry_lookup_endpoints() {
    let collector = setup_test_collector().await.with_max_range(3);
    let entries = append_entries(&collector, 6).await;
    let app = collector::router(collector);

    let (status, body) = get_json(&app, "/entries/2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blockHMAC"], entries[1].block_hmac);

    let (status, body) = get_json(&app, "/entries?from=2&to=4").await;
    assert_eq!(status, StatusCode::OK);
    let numbers: Vec<u64> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["sequenceNumber"].as_u64().unwrap())
        .collect();
    assert_eq!(numbers, vec![2, 3, 4]);

    // Bounded by max_range
    let (_, body) = get_json(&app, "/entries?from=1&to=6").await;
    assert_eq!(body["entries"].as_array().unwrap().len(), 3);
    assert_eq!(body["to"], 3);
}
