//! Collector Client
//!
//! Thin HTTP client for the collector's two emitter-facing endpoints.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::audit::entry::{LogEntry, LogLevel, LogRequest};
use crate::error::{
    AuditChainError, REASON_INVALID_PREVIOUS_HMAC, REASON_INVALID_SEQUENCE_NUMBER,
    REASON_INVALID_SIGNATURE,
};

/// Why the collector refused an entry, as seen from the emitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    InvalidSignature,
    InvalidPreviousHmac,
    InvalidSequenceNumber,
    StorageFailure,
    Other { status: u16, reason: String },
}

impl Rejection {
    pub fn from_response(status: StatusCode, reason: &str) -> Self {
        if status.is_server_error() {
            return Rejection::StorageFailure;
        }

        match reason.to_ascii_lowercase().as_str() {
            r if r == REASON_INVALID_SIGNATURE => Rejection::InvalidSignature,
            r if r == REASON_INVALID_PREVIOUS_HMAC.to_ascii_lowercase() => {
                Rejection::InvalidPreviousHmac
            }
            r if r == REASON_INVALID_SEQUENCE_NUMBER => Rejection::InvalidSequenceNumber,
            _ => Rejection::Other {
                status: status.as_u16(),
                reason: reason.to_string(),
            },
        }
    }

    /// Only a lost sequence race can be recovered by resyncing and trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Rejection::InvalidSequenceNumber)
    }

    /// Misconfigured secrets or a tampered ledger.
    pub fn needs_operator(&self) -> bool {
        matches!(
            self,
            Rejection::InvalidSignature | Rejection::InvalidPreviousHmac
        )
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::InvalidSignature => write!(f, "{}", REASON_INVALID_SIGNATURE),
            Rejection::InvalidPreviousHmac => write!(f, "{}", REASON_INVALID_PREVIOUS_HMAC),
            Rejection::InvalidSequenceNumber => write!(f, "{}", REASON_INVALID_SEQUENCE_NUMBER),
            Rejection::StorageFailure => write!(f, "collector storage failure"),
            Rejection::Other { status, reason } => write!(f, "{} ({})", reason, status),
        }
    }
}

/// Result of one `POST /log/:level`.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Logged(LogEntry),
    Rejected(Rejection),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SequenceResponse {
    current_sequence_number: u64,
}

#[derive(Debug, Deserialize)]
struct LoggedResponse {
    status: String,
    log: Option<LogEntry>,
}

#[derive(Clone)]
pub struct CollectorClient {
    base_url: String,
    http_client: Client,
}

impl CollectorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AuditChainError> {
        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /current-sequence-number`
    pub async fn current_sequence_number(&self) -> Result<u64, AuditChainError> {
        let response = self
            .http_client
            .get(format!("{}/current-sequence-number", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        let body: SequenceResponse = response.json().await?;
        debug!("Collector reports sequence {}", body.current_sequence_number);
        Ok(body.current_sequence_number)
    }

    /// `POST /log/:level`. Transport failures are errors; refusals are outcomes.
    pub async fn submit(
        &self,
        level: LogLevel,
        request: &LogRequest,
    ) -> Result<SubmitOutcome, AuditChainError> {
        let response = self
            .http_client
            .post(format!("{}/log/{}", self.base_url, level))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            let logged: LoggedResponse = serde_json::from_value(body)?;
            return match (logged.status.as_str(), logged.log) {
                ("logged", Some(entry)) => Ok(SubmitOutcome::Logged(entry)),
                (other, _) => Ok(SubmitOutcome::Rejected(Rejection::Other {
                    status: status.as_u16(),
                    reason: format!("unexpected status {}", other),
                })),
            };
        }

        let reason = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(SubmitOutcome::Rejected(Rejection::from_response(status, &reason)))
    }
}
