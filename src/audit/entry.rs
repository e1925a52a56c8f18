//! Audit Log Entry
//!
//! Defines the wire request, the persisted hash-chained entry, and the
//! keyed digests that link entries together.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// `previousHMAC` of entry 1, which has no predecessor.
pub const GENESIS_PREVIOUS_HMAC: &str = "0";

/// Severity accepted on `POST /log/:level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

/// Shared secrets: A signs emitter requests, B stamps persisted blocks.
#[derive(Clone)]
pub struct ChainKeys {
    emitter_secret: Vec<u8>,
    collector_secret: Vec<u8>,
}

impl ChainKeys {
    pub fn new(emitter_secret: impl Into<Vec<u8>>, collector_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            emitter_secret: emitter_secret.into(),
            collector_secret: collector_secret.into(),
        }
    }

    pub fn emitter_secret(&self) -> &[u8] {
        &self.emitter_secret
    }

    pub fn collector_secret(&self) -> &[u8] {
        &self.collector_secret
    }
}

impl std::fmt::Debug for ChainKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainKeys")
            .field("emitter_secret", &"<redacted>")
            .field("collector_secret", &"<redacted>")
            .finish()
    }
}

/// Body of `POST /log/:level` as produced by an emitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRequest {
    pub sequence_number: u64,
    pub log: Value,
    #[serde(rename = "mainServerHMAC")]
    pub main_server_hmac: String,
}

impl LogRequest {
    /// Build a request and sign `{sequenceNumber, log}` with secret A.
    pub fn signed(sequence_number: u64, log: Value, emitter_secret: &[u8]) -> Self {
        let main_server_hmac = hmac_hex(emitter_secret, &signing_bytes(sequence_number, &log));
        Self {
            sequence_number,
            log,
            main_server_hmac,
        }
    }

    /// Check `mainServerHMAC` against secret A.
    pub fn verify_signature(&self, emitter_secret: &[u8]) -> bool {
        verify_hmac_hex(
            emitter_secret,
            &signing_bytes(self.sequence_number, &self.log),
            &self.main_server_hmac,
        )
    }
}

/// A persisted, collector-stamped link of the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub sequence_number: u64,
    pub log: Value,
    #[serde(rename = "mainServerHMAC")]
    pub main_server_hmac: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "previousHMAC")]
    pub previous_hmac: String,
    #[serde(rename = "blockHMAC")]
    pub block_hmac: String,
}

impl LogEntry {
    /// Stamp an accepted request. `previous_hmac` is the chain tail's `blockHMAC`.
    pub fn stamp(
        request: &LogRequest,
        previous_hmac: String,
        timestamp: DateTime<Utc>,
        collector_secret: &[u8],
    ) -> Self {
        let mut entry = Self {
            sequence_number: request.sequence_number,
            log: request.log.clone(),
            main_server_hmac: request.main_server_hmac.clone(),
            timestamp: normalize_timestamp(timestamp),
            previous_hmac,
            block_hmac: String::new(),
        };
        entry.block_hmac = entry.compute_block_hmac(collector_secret);
        entry
    }

    /// Canonical bytes covered by `blockHMAC`: every field except `blockHMAC`.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        json!({
            "sequenceNumber": self.sequence_number,
            "log": self.log,
            "mainServerHMAC": self.main_server_hmac,
            "timestamp": format_timestamp(&self.timestamp),
            "previousHMAC": self.previous_hmac,
        })
        .to_string()
        .into_bytes()
    }

    /// Recompute `blockHMAC` from the entry's current content.
    pub fn compute_block_hmac(&self, collector_secret: &[u8]) -> String {
        hmac_hex(collector_secret, &self.canonical_bytes())
    }

    /// Whether the stored `blockHMAC` still matches the content.
    pub fn verify_block_hmac(&self, collector_secret: &[u8]) -> bool {
        verify_hmac_hex(collector_secret, &self.canonical_bytes(), &self.block_hmac)
    }

    /// Whether `mainServerHMAC` still matches `{sequenceNumber, log}`.
    pub fn verify_signature(&self, emitter_secret: &[u8]) -> bool {
        verify_hmac_hex(
            emitter_secret,
            &signing_bytes(self.sequence_number, &self.log),
            &self.main_server_hmac,
        )
    }

    pub fn summary(&self) -> String {
        format!(
            "#{} at {} (prev {}, block {})",
            self.sequence_number,
            format_timestamp(&self.timestamp),
            short_hex(&self.previous_hmac),
            short_hex(&self.block_hmac)
        )
    }
}

/// The `(sequenceNumber, blockHMAC)` of the most recently accepted entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTail {
    pub sequence_number: u64,
    pub block_hmac: String,
}

impl ChainTail {
    /// Tail of an empty ledger.
    pub fn genesis() -> Self {
        Self {
            sequence_number: 0,
            block_hmac: GENESIS_PREVIOUS_HMAC.to_string(),
        }
    }

    pub fn from_entry(entry: &LogEntry) -> Self {
        Self {
            sequence_number: entry.sequence_number,
            block_hmac: entry.block_hmac.clone(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.sequence_number == 0
    }

    pub fn next_sequence_number(&self) -> u64 {
        self.sequence_number + 1
    }
}

impl Default for ChainTail {
    fn default() -> Self {
        Self::genesis()
    }
}

/// Canonical bytes signed by the emitter.
pub fn signing_bytes(sequence_number: u64, log: &Value) -> Vec<u8> {
    json!({
        "sequenceNumber": sequence_number,
        "log": log,
    })
    .to_string()
    .into_bytes()
}

/// HMAC-SHA256 of `data`, lowercase hex.
pub fn hmac_hex(key: &[u8], data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex HMAC against `data`.
pub fn verify_hmac_hex(key: &[u8], data: &[u8], expected_hex: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.verify_slice(&expected).is_ok()
}

/// Constant-time string comparison for digests already rendered as hex.
pub fn digests_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Timestamps are kept at microsecond precision so they survive storage as text.
pub fn normalize_timestamp(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(6)
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn short_hex(value: &str) -> &str {
    value.get(..12).unwrap_or(value)
}
