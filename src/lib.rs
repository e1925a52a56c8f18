pub mod audit;
pub mod collector;
pub mod config;
pub mod emitter;
pub mod error;
pub mod ledger;
pub mod redaction;

pub use audit::{ChainKeys, LogEntry, LogLevel, LogRequest};
pub use collector::LogCollector;
pub use emitter::{EmitOutcome, LogEmitter};
pub use error::{AuditChainError, ChainError};
pub use ledger::Ledger;
pub use redaction::RedactionFilter;
