//! Audit Log System
//!
//! Hash-chained log entries, the per-append validator, and the full-chain
//! verification walk.

pub mod entry;
pub mod validator;
pub mod verify;

pub use entry::{ChainKeys, ChainTail, LogEntry, LogLevel, LogRequest, GENESIS_PREVIOUS_HMAC};
pub use validator::ChainValidator;
pub use verify::{find_tampered_entries, verify_chain, verify_ledger, VerificationReport};
