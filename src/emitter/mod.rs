//! Log Emitter
//!
//! Per-process handle that turns `emit(level, message, metadata)` calls into
//! signed, sequenced collector requests. Every call is queued to a single
//! worker task which owns the local sequence counter, so sequence numbers
//! are reserved one at a time and `emit` never blocks or fails the caller.

pub mod client;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audit::entry::{format_timestamp, LogLevel, LogRequest};
use crate::config::EmitterConfig;
use crate::error::AuditChainError;
use crate::redaction::RedactionFilter;

pub use client::{CollectorClient, Rejection, SubmitOutcome};

/// What happened to one emitted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Accepted by the collector at this sequence number.
    Logged(u64),
    /// Refused by the collector and dropped.
    Rejected(Rejection),
    /// The collector could not be reached; dropped.
    Undelivered(String),
}

impl EmitOutcome {
    pub fn is_logged(&self) -> bool {
        matches!(self, EmitOutcome::Logged(_))
    }
}

#[derive(Debug)]
struct PendingRecord {
    level: LogLevel,
    message: String,
    metadata: Value,
    created_at: DateTime<Utc>,
}

enum Command {
    Emit(PendingRecord),
    Deliver(PendingRecord, oneshot::Sender<EmitOutcome>),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to the process-wide emitter worker.
#[derive(Clone)]
pub struct LogEmitter {
    sender: mpsc::Sender<Command>,
}

impl LogEmitter {
    /// Start the worker described by `config`. Must be called inside a Tokio runtime.
    pub fn spawn(config: &EmitterConfig) -> Result<(Self, JoinHandle<()>), AuditChainError> {
        let client = CollectorClient::new(
            config.collector_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;

        Ok(Self::with_client(
            client,
            config.emitter_secret.as_bytes().to_vec(),
            config.redaction_filter(),
            config.queue_capacity,
            config.max_retries,
        ))
    }

    pub fn with_client(
        client: CollectorClient,
        emitter_secret: Vec<u8>,
        redaction: RedactionFilter,
        queue_capacity: usize,
        max_retries: u32,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));

        let worker = EmitterWorker {
            client,
            emitter_secret,
            redaction,
            max_retries,
            local_sequence_number: 0,
            synced: false,
            receiver,
        };

        let handle = tokio::spawn(worker.run());
        (Self { sender }, handle)
    }

    /// Fire-and-forget. Never blocks and never reports failure to the caller.
    pub fn emit(&self, level: LogLevel, message: impl Into<String>, metadata: Value) {
        let record = PendingRecord::new(level, message.into(), metadata);

        match self.sender.try_send(Command::Emit(record)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Audit log queue full, dropping {} record", level)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Audit log emitter stopped, dropping {} record", level)
            }
        }
    }

    pub fn info(&self, message: impl Into<String>, metadata: Value) {
        self.emit(LogLevel::Info, message, metadata);
    }

    pub fn warn(&self, message: impl Into<String>, metadata: Value) {
        self.emit(LogLevel::Warn, message, metadata);
    }

    pub fn error(&self, message: impl Into<String>, metadata: Value) {
        self.emit(LogLevel::Error, message, metadata);
    }

    /// Queue one record and wait for its outcome.
    pub async fn deliver(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        metadata: Value,
    ) -> EmitOutcome {
        let record = PendingRecord::new(level, message.into(), metadata);
        let (reply, outcome) = oneshot::channel();

        if self.sender.send(Command::Deliver(record, reply)).await.is_err() {
            return EmitOutcome::Undelivered("emitter stopped".to_string());
        }

        outcome
            .await
            .unwrap_or_else(|_| EmitOutcome::Undelivered("emitter stopped".to_string()))
    }

    /// Wait until every record queued before this call has been processed.
    pub async fn flush(&self) {
        let (done, flushed) = oneshot::channel();
        if self.sender.send(Command::Flush(done)).await.is_ok() {
            let _ = flushed.await;
        }
    }
}

impl PendingRecord {
    fn new(level: LogLevel, message: String, metadata: Value) -> Self {
        Self {
            level,
            message,
            metadata,
            created_at: Utc::now(),
        }
    }

    fn payload(&self) -> Value {
        json!({
            "level": self.level,
            "message": self.message,
            "metadata": self.metadata,
            "timestamp": format_timestamp(&self.created_at),
        })
    }
}

struct EmitterWorker {
    client: CollectorClient,
    emitter_secret: Vec<u8>,
    redaction: RedactionFilter,
    max_retries: u32,
    local_sequence_number: u64,
    synced: bool,
    receiver: mpsc::Receiver<Command>,
}

impl EmitterWorker {
    async fn run(mut self) {
        self.resync().await;

        while let Some(command) = self.receiver.recv().await {
            match command {
                Command::Emit(record) => {
                    self.process(record).await;
                }
                Command::Deliver(record, reply) => {
                    let outcome = self.process(record).await;
                    let _ = reply.send(outcome);
                }
                Command::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }

        debug!("Audit log emitter stopped");
    }

    /// Adopt the collector's current sequence number as the local counter.
    async fn resync(&mut self) -> bool {
        match self.client.current_sequence_number().await {
            Ok(sequence_number) => {
                self.local_sequence_number = sequence_number;
                self.synced = true;
                debug!("Synchronized local sequence number to {}", sequence_number);
                true
            }
            Err(e) => {
                warn!("Failed to retrieve current sequence number: {}", e);
                self.synced = false;
                false
            }
        }
    }

    async fn process(&mut self, record: PendingRecord) -> EmitOutcome {
        let payload = self.redaction.redact(&record.payload());

        if !self.synced {
            self.resync().await;
        }

        let mut retries = 0;
        loop {
            let candidate = self.local_sequence_number + 1;
            let request = LogRequest::signed(candidate, payload.clone(), &self.emitter_secret);

            // Reserved before confirmation; a refusal resyncs it below.
            self.local_sequence_number = candidate;

            let rejection = match self.client.submit(record.level, &request).await {
                Ok(SubmitOutcome::Logged(entry)) => {
                    debug!("Audit record accepted as entry {}", entry.sequence_number);
                    return EmitOutcome::Logged(entry.sequence_number);
                }
                Ok(SubmitOutcome::Rejected(rejection)) => rejection,
                Err(e) => {
                    warn!("Failed to send log to collector: {}", e);
                    self.synced = false;
                    return EmitOutcome::Undelivered(e.to_string());
                }
            };

            self.resync().await;

            if rejection.is_retryable() && retries < self.max_retries {
                retries += 1;
                info!(
                    "Sequence {} lost to another writer, retrying as {} (attempt {})",
                    candidate,
                    self.local_sequence_number + 1,
                    retries
                );
                continue;
            }

            if rejection.needs_operator() {
                error!(
                    "Collector refused audit record ({}); check secrets or investigate tampering",
                    rejection
                );
            } else {
                warn!("Collector refused audit record: {}", rejection);
            }
            return EmitOutcome::Rejected(rejection);
        }
    }
}
