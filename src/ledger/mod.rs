//! Append-only ledger
//!
//! SQLite-backed storage for chain entries. Only insertion and lookups are
//! exposed; the schema additionally aborts any UPDATE or DELETE.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use crate::audit::entry::{format_timestamp, LogEntry};
use crate::error::AuditChainError;

const SELECT_COLUMNS: &str =
    "sequence_number, log, main_server_hmac, timestamp, previous_hmac, block_hmac";

#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (creating if missing) the database at `database_url` and migrate it.
    pub async fn connect(database_url: &str) -> Result<Self, AuditChainError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let ledger = Ledger { pool };
        ledger.run_migrations().await?;
        info!("Ledger opened at {}", database_url);
        Ok(ledger)
    }

    /// Open an existing ledger read-only, without creating or migrating it.
    pub async fn open_existing(database_url: &str) -> Result<Self, AuditChainError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(false)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                AuditChainError::DatabaseError(format!(
                    "Cannot open ledger {}: {}",
                    database_url, e
                ))
            })?;

        sqlx::query("SELECT sequence_number FROM log_entries LIMIT 1")
            .fetch_optional(&pool)
            .await
            .map_err(|e| {
                AuditChainError::DatabaseError(format!(
                    "{} is not an audit ledger: {}",
                    database_url, e
                ))
            })?;

        info!("Ledger opened read-only at {}", database_url);
        Ok(Ledger { pool })
    }

    /// Private in-memory ledger, mostly for tests.
    ///
    /// Every SQLite `:memory:` connection is its own database, so the pool is
    /// pinned to one connection that is never recycled.
    pub async fn in_memory() -> Result<Self, AuditChainError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let ledger = Ledger { pool };
        ledger.run_migrations().await?;
        Ok(ledger)
    }

    pub async fn run_migrations(&self) -> Result<(), AuditChainError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a stamped entry. Fails if the sequence number already exists.
    pub async fn append(&self, entry: &LogEntry) -> Result<(), AuditChainError> {
        sqlx::query(
            r#"
            INSERT INTO log_entries
            (sequence_number, log, main_server_hmac, timestamp, previous_hmac, block_hmac)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(to_db_sequence(entry.sequence_number)?)
        .bind(serde_json::to_string(&entry.log)?)
        .bind(&entry.main_server_hmac)
        .bind(format_timestamp(&entry.timestamp))
        .bind(&entry.previous_hmac)
        .bind(&entry.block_hmac)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AuditChainError::DatabaseError(format!(
                "Failed to append entry {}: {}",
                entry.sequence_number, e
            ))
        })?;

        debug!("Appended ledger entry: {}", entry.summary());
        Ok(())
    }

    /// Point lookup by sequence number.
    pub async fn get(&self, sequence_number: u64) -> Result<Option<LogEntry>, AuditChainError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM log_entries WHERE sequence_number = ?",
            SELECT_COLUMNS
        ))
        .bind(to_db_sequence(sequence_number)?)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    /// Entry with the highest sequence number, if any.
    pub async fn tail(&self) -> Result<Option<LogEntry>, AuditChainError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM log_entries ORDER BY sequence_number DESC LIMIT 1",
            SELECT_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    /// Entries with `from <= sequence_number <= to`, ascending.
    pub async fn range(&self, from: u64, to: u64) -> Result<Vec<LogEntry>, AuditChainError> {
        if from > to {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "SELECT {} FROM log_entries WHERE sequence_number BETWEEN ? AND ? ORDER BY sequence_number ASC",
            SELECT_COLUMNS
        ))
        .bind(to_db_sequence(from)?)
        .bind(to_db_sequence(to)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Every entry, ascending.
    pub async fn all(&self) -> Result<Vec<LogEntry>, AuditChainError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM log_entries ORDER BY sequence_number ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    pub async fn count(&self) -> Result<u64, AuditChainError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM log_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_db_sequence(sequence_number: u64) -> Result<i64, AuditChainError> {
    i64::try_from(sequence_number).map_err(|_| {
        AuditChainError::DatabaseError(format!(
            "Sequence number out of range: {}",
            sequence_number
        ))
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<LogEntry, AuditChainError> {
    let sequence_number: i64 = row.try_get("sequence_number")?;
    let log: String = row.try_get("log")?;
    let timestamp: String = row.try_get("timestamp")?;

    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| {
            AuditChainError::SerializationError(format!(
                "Invalid timestamp on entry {}: {}",
                sequence_number, e
            ))
        })?
        .with_timezone(&Utc);

    Ok(LogEntry {
        sequence_number: sequence_number as u64,
        log: serde_json::from_str(&log)?,
        main_server_hmac: row.try_get("main_server_hmac")?,
        timestamp,
        previous_hmac: row.try_get("previous_hmac")?,
        block_hmac: row.try_get("block_hmac")?,
    })
}
