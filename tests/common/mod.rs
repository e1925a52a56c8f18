#![allow(dead_code)]

use audit_chain::audit::{ChainKeys, LogEntry, LogRequest};
use audit_chain::collector::{self, LogCollector};
use audit_chain::ledger::Ledger;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

pub const SECRET_A: &str = "test-emitter-secret";
pub const SECRET_B: &str = "test-collector-secret";

pub fn test_keys() -> ChainKeys {
    ChainKeys::new(SECRET_A, SECRET_B)
}

/// Collector over a fresh in-memory ledger
pub async fn setup_test_collector() -> LogCollector {
    let ledger = Ledger::in_memory().await.expect("Failed to create test ledger");
    LogCollector::recover(ledger, test_keys())
        .await
        .expect("Failed to recover collector")
}

/// Payload shaped like the emitter's
pub fn sample_payload(message: &str) -> Value {
    json!({
        "level": "info",
        "message": message,
        "metadata": {"service": "checkout"},
        "timestamp": "2024-01-01T00:00:00.000000Z"
    })
}

pub fn signed_request(sequence_number: u64, message: &str) -> LogRequest {
    LogRequest::signed(sequence_number, sample_payload(message), SECRET_A.as_bytes())
}

/// Append entries `1..=count` through the collector
pub async fn append_entries(collector: &LogCollector, count: u64) -> Vec<LogEntry> {
    let start = collector.current_sequence_number().await;
    let mut entries = Vec::new();
    for sequence_number in start + 1..=start + count {
        let entry = collector
            .append_entry(signed_request(sequence_number, &format!("event {}", sequence_number)))
            .await
            .expect("append should succeed");
        entries.push(entry);
    }
    entries
}

/// Bypass the append-only triggers, as an attacker with database access would
pub async fn tamper_payload(ledger: &Ledger, sequence_number: u64, payload: &Value) {
    sqlx::query("DROP TRIGGER IF EXISTS log_entries_no_update")
        .execute(ledger.pool())
        .await
        .unwrap();
    sqlx::query("UPDATE log_entries SET log = ? WHERE sequence_number = ?")
        .bind(payload.to_string())
        .bind(sequence_number as i64)
        .execute(ledger.pool())
        .await
        .unwrap();
}

/// Overwrite one raw column of a stored entry, bypassing the triggers
pub async fn tamper_column(ledger: &Ledger, sequence_number: u64, column: &str, value: &str) {
    sqlx::query("DROP TRIGGER IF EXISTS log_entries_no_update")
        .execute(ledger.pool())
        .await
        .unwrap();
    sqlx::query(&format!(
        "UPDATE log_entries SET {} = ? WHERE sequence_number = ?",
        column
    ))
    .bind(value)
    .bind(sequence_number as i64)
    .execute(ledger.pool())
    .await
    .unwrap();
}

/// Serve the collector on an ephemeral port; returns its base URL
pub async fn spawn_collector_server(collector: LogCollector) -> (String, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = collector::router(collector);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), handle)
}
