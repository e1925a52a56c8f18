use thiserror::Error;

/// Reasons the collector rejects an append, as carried in `{"error": ...}`.
pub const REASON_INVALID_SIGNATURE: &str = "invalid signature";
pub const REASON_INVALID_PREVIOUS_HMAC: &str = "invalid previousHMAC";
pub const REASON_INVALID_SEQUENCE_NUMBER: &str = "invalid sequence number";
pub const REASON_STORAGE_FAILURE: &str = "failed to log message";

/// Failure kinds of a single append attempt.
///
/// The `Display` output of each variant is exactly the reason string sent
/// back to the emitter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// `mainServerHMAC` does not match the entry: forged or corrupted in transit.
    #[error("invalid signature")]
    SignatureMismatch,

    /// The persisted chain tail no longer reproduces the in-memory `blockHMAC`.
    #[error("invalid previousHMAC")]
    ChainLinkMismatch,

    /// Ordering violation, replay, or the loser of a concurrent append.
    #[error("invalid sequence number")]
    SequenceMismatch { expected: u64, got: u64 },

    /// The ledger could not be read or written.
    #[error("failed to log message")]
    StorageFailure(String),
}

#[derive(Error, Debug)]
pub enum AuditChainError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Transport error: {0}")]
    TransportError(String),
}

impl From<serde_json::Error> for AuditChainError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for AuditChainError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(format!("Database error: {}", err))
    }
}

impl From<sqlx::migrate::MigrateError> for AuditChainError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::DatabaseError(format!("Migration error: {}", err))
    }
}

impl From<reqwest::Error> for AuditChainError {
    fn from(err: reqwest::Error) -> Self {
        Self::TransportError(err.to_string())
    }
}

impl From<config::ConfigError> for AuditChainError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}
