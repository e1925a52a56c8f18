//! Log Collector
//!
//! Sole authority for chain state. Validation, stamping and persistence of
//! an append run under one lock; the chain tail is rebuilt from the ledger
//! on every start.

pub mod routes;

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::audit::entry::{ChainKeys, ChainTail, LogEntry, LogRequest};
use crate::audit::validator::ChainValidator;
use crate::error::{AuditChainError, ChainError};
use crate::ledger::Ledger;
use crate::redaction::RedactionFilter;

pub use routes::router;

/// Default upper bound on entries returned by one range read.
pub const DEFAULT_MAX_RANGE: u64 = 1000;

#[derive(Clone)]
pub struct LogCollector {
    ledger: Ledger,
    keys: Arc<ChainKeys>,
    redaction: Arc<RedactionFilter>,
    tail: Arc<Mutex<ChainTail>>,
    max_range: u64,
}

impl LogCollector {
    /// Build a collector whose chain tail is read from the ledger's highest entry.
    pub async fn recover(ledger: Ledger, keys: ChainKeys) -> Result<Self, AuditChainError> {
        let tail = match ledger.tail().await? {
            Some(entry) => ChainTail::from_entry(&entry),
            None => ChainTail::genesis(),
        };

        info!(
            "Recovered chain tail at sequence {} from ledger",
            tail.sequence_number
        );

        Ok(Self {
            ledger,
            keys: Arc::new(keys),
            redaction: Arc::new(RedactionFilter::default()),
            tail: Arc::new(Mutex::new(tail)),
            max_range: DEFAULT_MAX_RANGE,
        })
    }

    pub fn with_redaction(mut self, redaction: RedactionFilter) -> Self {
        self.redaction = Arc::new(redaction);
        self
    }

    pub fn with_max_range(mut self, max_range: u64) -> Self {
        self.max_range = max_range.max(1);
        self
    }

    /// Validate, stamp, persist, and advance the tail as one critical section.
    ///
    /// On rejection nothing is persisted and the tail is unchanged.
    pub async fn append_entry(&self, mut request: LogRequest) -> Result<LogEntry, ChainError> {
        self.redaction.redact_in_place(&mut request.log);

        let mut tail = self.tail.lock().await;

        let predecessor = if tail.is_genesis() {
            None
        } else {
            match self.ledger.get(tail.sequence_number).await {
                Ok(entry) => entry,
                // The row exists but its content was altered beyond decoding.
                Err(AuditChainError::SerializationError(e)) => {
                    error!(
                        "Rejected entry {}: stored entry {} no longer decodes: {}",
                        request.sequence_number, tail.sequence_number, e
                    );
                    return Err(ChainError::ChainLinkMismatch);
                }
                Err(e) => {
                    error!("Failed to read chain tail {}: {}", tail.sequence_number, e);
                    return Err(ChainError::StorageFailure(e.to_string()));
                }
            }
        };

        let entry = ChainValidator::new(&self.keys)
            .validate(&request, &tail, predecessor.as_ref(), Utc::now())
            .map_err(|e| {
                match &e {
                    ChainError::SequenceMismatch { expected, got } => {
                        warn!("Rejected entry: invalid sequence number (expected {}, got {})", expected, got)
                    }
                    ChainError::ChainLinkMismatch => error!(
                        "Rejected entry {}: stored entry {} no longer matches its block HMAC",
                        request.sequence_number, tail.sequence_number
                    ),
                    other => warn!("Rejected entry {}: {}", request.sequence_number, other),
                }
                e
            })?;

        self.ledger.append(&entry).await.map_err(|e| {
            error!("Failed to persist entry {}: {}", entry.sequence_number, e);
            ChainError::StorageFailure(e.to_string())
        })?;

        *tail = ChainTail::from_entry(&entry);
        info!("Logged entry {}", entry.sequence_number);

        Ok(entry)
    }

    pub async fn current_sequence_number(&self) -> u64 {
        self.tail.lock().await.sequence_number
    }

    pub async fn chain_tail(&self) -> ChainTail {
        self.tail.lock().await.clone()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn max_range(&self) -> u64 {
        self.max_range
    }
}
