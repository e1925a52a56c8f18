//! Audit Log Verification
//!
//! Full re-walk of the chain from entry 1. Per-write validation only looks
//! at the immediate predecessor; this is the operation that catches an
//! alteration anywhere in the history.

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::audit::entry::{digests_equal, ChainKeys, LogEntry, GENESIS_PREVIOUS_HMAC};
use crate::ledger::Ledger;

/// What went wrong at a given position of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakKind {
    /// Sequence numbers are not the contiguous run `1..=N`.
    SequenceGap { expected: u64, found: u64 },
    /// `mainServerHMAC` no longer matches `{sequenceNumber, log}`.
    SignatureInvalid,
    /// Stored `blockHMAC` no longer matches the entry's content.
    BlockHmacMismatch,
    /// `previousHMAC` does not match the predecessor's recomputed `blockHMAC`.
    LinkMismatch,
}

impl std::fmt::Display for BreakKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakKind::SequenceGap { expected, found } => {
                write!(f, "sequence gap (expected {}, found {})", expected, found)
            }
            BreakKind::SignatureInvalid => write!(f, "emitter signature invalid"),
            BreakKind::BlockHmacMismatch => write!(f, "block HMAC mismatch"),
            BreakKind::LinkMismatch => write!(f, "previous HMAC does not link to predecessor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    pub sequence_number: u64,
    pub kind: BreakKind,
}

/// Verification result with detailed information
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub is_valid: bool,
    pub entry_count: usize,
    pub first_break: Option<ChainBreak>,
    pub breaks: Vec<ChainBreak>,
    pub head_block_hmac: Option<String>,
}

impl VerificationReport {
    pub fn summary(&self) -> String {
        match &self.first_break {
            None => format!("Audit chain is valid ({} entries)", self.entry_count),
            Some(chain_break) => format!(
                "Audit chain is invalid ({} entries): entry {}: {}",
                self.entry_count, chain_break.sequence_number, chain_break.kind
            ),
        }
    }

    pub fn detailed_status(&self) -> String {
        let mut lines = vec![
            format!("Entries: {}", self.entry_count),
            format!(
                "Head block HMAC: {}",
                self.head_block_hmac.as_deref().unwrap_or("none")
            ),
            format!("Breaks: {}", self.breaks.len()),
        ];
        for chain_break in &self.breaks {
            lines.push(format!("  #{}: {}", chain_break.sequence_number, chain_break.kind));
        }
        lines.join("\n")
    }
}

/// Walk `entries` (ascending) and record every break.
///
/// An empty chain is valid.
pub fn verify_chain(entries: &[LogEntry], keys: &ChainKeys) -> VerificationReport {
    let mut breaks = Vec::new();
    let mut expected_previous = GENESIS_PREVIOUS_HMAC.to_string();
    let mut previous_sequence = 0;

    for entry in entries {
        let expected_sequence = previous_sequence + 1;
        if entry.sequence_number != expected_sequence {
            breaks.push(ChainBreak {
                sequence_number: entry.sequence_number,
                kind: BreakKind::SequenceGap {
                    expected: expected_sequence,
                    found: entry.sequence_number,
                },
            });
        }

        if !entry.verify_signature(keys.emitter_secret()) {
            breaks.push(ChainBreak {
                sequence_number: entry.sequence_number,
                kind: BreakKind::SignatureInvalid,
            });
        }

        let recomputed = entry.compute_block_hmac(keys.collector_secret());
        if !digests_equal(&recomputed, &entry.block_hmac) {
            breaks.push(ChainBreak {
                sequence_number: entry.sequence_number,
                kind: BreakKind::BlockHmacMismatch,
            });
        }

        if !digests_equal(&entry.previous_hmac, &expected_previous) {
            breaks.push(ChainBreak {
                sequence_number: entry.sequence_number,
                kind: BreakKind::LinkMismatch,
            });
        }

        expected_previous = recomputed;
        previous_sequence = entry.sequence_number;
    }

    let first_break = breaks.first().cloned();
    if let Some(chain_break) = &first_break {
        warn!(
            "Audit chain broken at entry {}: {}",
            chain_break.sequence_number, chain_break.kind
        );
    } else {
        info!("Audit chain verification successful: {} entries", entries.len());
    }

    VerificationReport {
        is_valid: first_break.is_none(),
        entry_count: entries.len(),
        first_break,
        breaks,
        head_block_hmac: entries.last().map(|entry| entry.block_hmac.clone()),
    }
}

/// Sequence numbers whose stored content no longer reproduces their HMACs.
pub fn find_tampered_entries(entries: &[LogEntry], keys: &ChainKeys) -> Vec<u64> {
    entries
        .iter()
        .filter(|entry| {
            !entry.verify_block_hmac(keys.collector_secret())
                || !entry.verify_signature(keys.emitter_secret())
        })
        .map(|entry| entry.sequence_number)
        .collect()
}

/// Information about missing sequence numbers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapInfo {
    pub after: u64,
    pub before: u64,
}

impl GapInfo {
    pub fn missing(&self) -> u64 {
        self.before.saturating_sub(self.after + 1)
    }
}

/// Detect missing or duplicated positions in an ascending entry list.
pub fn detect_sequence_gaps(entries: &[LogEntry]) -> Vec<GapInfo> {
    let mut gaps = Vec::new();
    let mut previous = 0;

    for entry in entries {
        if entry.sequence_number != previous + 1 {
            gaps.push(GapInfo {
                after: previous,
                before: entry.sequence_number,
            });
        }
        previous = entry.sequence_number;
    }

    gaps
}

/// Load every entry from `ledger` and walk the chain.
pub async fn verify_ledger(ledger: &Ledger, keys: &ChainKeys) -> Result<VerificationReport> {
    let entries = ledger
        .all()
        .await
        .map_err(|e| anyhow!("Failed to load ledger entries: {}", e))?;

    Ok(verify_chain(&entries, keys))
}
