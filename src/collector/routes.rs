use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::audit::entry::{LogLevel, LogRequest};
use crate::collector::LogCollector;
use crate::error::ChainError;

pub fn router(collector: LogCollector) -> Router {
    Router::new()
        .route("/log/:level", post(append_log))
        .route("/current-sequence-number", get(current_sequence_number))
        .route("/entries", get(list_entries))
        .route("/entries/:sequence_number", get(get_entry))
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(collector)
}

impl IntoResponse for ChainError {
    fn into_response(self) -> Response {
        let status = match self {
            ChainError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn bad_request(reason: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": reason })))
}

async fn append_log(
    State(collector): State<LogCollector>,
    Path(level): Path<String>,
    payload: Result<Json<LogRequest>, JsonRejection>,
) -> Response {
    let level: LogLevel = match level.parse() {
        Ok(level) => level,
        Err(_) => return bad_request("invalid log level").into_response(),
    };

    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => {
            warn!("Malformed log request: {}", rejection);
            return bad_request("malformed log request").into_response();
        }
    };

    if let Some(declared) = request.log.get("level").and_then(|v| v.as_str()) {
        if declared != level.as_str() {
            warn!(
                "Log request {} posted to /log/{} declares level {}",
                request.sequence_number, level, declared
            );
        }
    }

    match collector.append_entry(request).await {
        Ok(entry) => Json(json!({ "status": "logged", "log": entry })).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn current_sequence_number(State(collector): State<LogCollector>) -> Json<Value> {
    Json(json!({
        "currentSequenceNumber": collector.current_sequence_number().await
    }))
}

async fn get_entry(
    State(collector): State<LogCollector>,
    Path(sequence_number): Path<u64>,
) -> (StatusCode, Json<Value>) {
    match collector.ledger().get(sequence_number).await {
        Ok(Some(entry)) => (StatusCode::OK, Json(json!(entry))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "entry not found" })),
        ),
        Err(e) => {
            error!("Failed to read entry {}: {}", sequence_number, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to read ledger" })),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    from: Option<u64>,
    to: Option<u64>,
}

async fn list_entries(
    State(collector): State<LogCollector>,
    Query(params): Query<RangeParams>,
) -> (StatusCode, Json<Value>) {
    let from = params.from.unwrap_or(1).max(1);
    let max_to = from.saturating_add(collector.max_range() - 1);
    let to = params.to.unwrap_or(max_to).min(max_to);

    match collector.ledger().range(from, to).await {
        Ok(entries) => (
            StatusCode::OK,
            Json(json!({ "from": from, "to": to, "entries": entries })),
        ),
        Err(e) => {
            error!("Failed to read entries {}..={}: {}", from, to, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to read ledger" })),
            )
        }
    }
}

async fn health_check(State(collector): State<LogCollector>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "audit-collector",
        "timestamp": chrono::Utc::now(),
        "currentSequenceNumber": collector.current_sequence_number().await
    }))
}
