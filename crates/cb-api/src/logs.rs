//! Integration log API.

use axum::extract::{Query, State};
use axum::Json;
use cb_common::{CallStatus, IntegrationLogRecord};
use cb_outbox::LogFilter;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LogsQuery {
    /// Filter by integration name, e.g. `temporal` or `erpnext`.
    pub integration: Option<String>,
    /// Filter by call status: `success`, `error`, or `stub`.
    pub status: Option<String>,
    /// Maximum entries to return (default 50, capped at 200).
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationLogResponse {
    pub id: i64,
    pub integration: String,
    pub operation: String,
    pub direction: String,
    pub status: String,
    pub correlation_id: Option<String>,
    pub request_data: Option<serde_json::Value>,
    pub response_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub response_code: Option<i32>,
    pub duration_ms: Option<f64>,
    pub created_at: String,
}

impl From<IntegrationLogRecord> for IntegrationLogResponse {
    fn from(record: IntegrationLogRecord) -> Self {
        Self {
            id: record.id,
            integration: record.entry.integration,
            operation: record.entry.operation,
            direction: record.entry.direction.as_str().to_string(),
            status: record.entry.status.as_str().to_string(),
            correlation_id: record.entry.correlation_id,
            request_data: record.entry.request_data,
            response_data: record.entry.response_data,
            error_message: record.entry.error_message,
            response_code: record.entry.response_code,
            duration_ms: record.entry.duration_ms,
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

/// Recent outbound call attempts, newest first.
#[utoipa::path(
    get,
    path = "/citybus/integration-logs",
    tag = "integrations",
    params(LogsQuery),
    responses(
        (status = 200, description = "Log entries", body = [IntegrationLogResponse]),
        (status = 422, description = "Unknown status filter", body = crate::error::ErrorBody),
    )
)]
pub async fn list_integration_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<Vec<IntegrationLogResponse>>> {
    let status = match &query.status {
        Some(s) => Some(
            CallStatus::parse(s)
                .ok_or_else(|| ApiError::unprocessable(format!("unknown status: {}", s)))?,
        ),
        None => None,
    };

    let filter = LogFilter {
        integration: query.integration,
        status,
        limit: query.limit.unwrap_or(50).min(200),
    };
    let records = state.logs.list(&filter).await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}
