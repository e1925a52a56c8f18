//! Chain Validator
//!
//! Pure acceptance check for one incoming request against the current
//! chain tail. Storage lookups happen in the caller.

use chrono::{DateTime, Utc};

use crate::audit::entry::{digests_equal, ChainKeys, ChainTail, LogEntry, LogRequest};
use crate::error::ChainError;

pub struct ChainValidator<'a> {
    keys: &'a ChainKeys,
}

impl<'a> ChainValidator<'a> {
    pub fn new(keys: &'a ChainKeys) -> Self {
        Self { keys }
    }

    /// Validate `request` and, when every check passes, return the stamped entry.
    ///
    /// `predecessor` is the persisted entry at `tail.sequence_number`, or
    /// `None` when the ledger is empty or the row is missing. Checks run in
    /// order: signature, link, ordering.
    pub fn validate(
        &self,
        request: &LogRequest,
        tail: &ChainTail,
        predecessor: Option<&LogEntry>,
        timestamp: DateTime<Utc>,
    ) -> Result<LogEntry, ChainError> {
        if !request.verify_signature(self.keys.emitter_secret()) {
            return Err(ChainError::SignatureMismatch);
        }

        if !tail.is_genesis() {
            self.check_link(tail, predecessor)?;
        }

        let expected = tail.next_sequence_number();
        if request.sequence_number != expected {
            return Err(ChainError::SequenceMismatch {
                expected,
                got: request.sequence_number,
            });
        }

        Ok(LogEntry::stamp(
            request,
            tail.block_hmac.clone(),
            timestamp,
            self.keys.collector_secret(),
        ))
    }

    /// The persisted tail must still reproduce the `blockHMAC` the next entry will reference.
    fn check_link(&self, tail: &ChainTail, predecessor: Option<&LogEntry>) -> Result<(), ChainError> {
        let Some(previous) = predecessor else {
            return Err(ChainError::ChainLinkMismatch);
        };

        if previous.sequence_number != tail.sequence_number {
            return Err(ChainError::ChainLinkMismatch);
        }

        let recomputed = previous.compute_block_hmac(self.keys.collector_secret());
        if !digests_equal(&recomputed, &tail.block_hmac) {
            return Err(ChainError::ChainLinkMismatch);
        }

        Ok(())
    }
}
