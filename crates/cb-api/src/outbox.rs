//! Outbox API: publish, dispatch, stats, recent events.

use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::Json;
use cb_common::{DispatchSummary, OutboxEvent, OutboxStats};
use cb_context::ResolvedContext;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiResult;
use crate::AppState;

/// Read model of an outbox event.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEventResponse {
    pub event_id: String,
    pub event_type: String,
    pub tenant_id: Option<String>,
    pub status: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub correlation_id: Option<String>,
    pub error_message: Option<String>,
    pub published_at: Option<String>,
    pub next_retry_at: Option<String>,
    pub created_at: String,
}

impl From<OutboxEvent> for OutboxEventResponse {
    fn from(event: OutboxEvent) -> Self {
        Self {
            event_id: event.event_id,
            event_type: event.event_type,
            tenant_id: event.tenant_id,
            status: event.status.as_str().to_string(),
            retry_count: event.retry_count,
            max_retries: event.max_retries,
            correlation_id: event.correlation_id,
            error_message: event.error_message,
            published_at: event.published_at.map(|t| t.to_rfc3339()),
            next_retry_at: event.next_retry_at.map(|t| t.to_rfc3339()),
            created_at: event.created_at.to_rfc3339(),
        }
    }
}

/// Publish request. `node_context` fields participate in context resolution
/// below any transport signal (header, route, cookie); `tenant_id` overrides
/// the tenant resolved from the context when supplied.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PublishRequest {
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_context: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublishResponse {
    pub success: bool,
    pub event: OutboxEventResponse,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DispatchRequest {
    pub batch_size: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RecentQuery {
    /// Maximum events to return (default 20, capped at 100).
    pub limit: Option<u32>,
}

/// Record a domain event in the outbox.
#[utoipa::path(
    post,
    path = "/citybus/outbox/publish",
    tag = "outbox",
    request_body = PublishRequest,
    responses(
        (status = 201, description = "Event recorded as pending", body = PublishResponse),
        (status = 422, description = "Invalid event", body = crate::error::ErrorBody),
    )
)]
pub async fn publish_event(
    State(state): State<AppState>,
    Extension(resolved): Extension<ResolvedContext>,
    Json(request): Json<PublishRequest>,
) -> ApiResult<(StatusCode, Json<PublishResponse>)> {
    // The middleware never sees the body; when the caller embedded context
    // fields there, re-run resolution with the body included.
    let resolved = if request.node_context.is_some() {
        let body = serde_json::to_value(&request).map_err(cb_common::CityBusError::from)?;
        let signals = resolved.signals.clone().with_body(body);
        state.resolver.resolve_request(signals).await?
    } else {
        resolved
    };

    let tenant_id = request
        .tenant_id
        .clone()
        .or_else(|| resolved.tenant.as_ref().map(|t| t.id.clone()));
    let stored = state
        .publisher
        .publish(
            &request.event_type,
            request.payload,
            resolved.context,
            tenant_id,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PublishResponse {
            success: true,
            event: stored.into(),
        }),
    ))
}

/// Dispatch one batch of due events.
#[utoipa::path(
    post,
    path = "/citybus/outbox/dispatch",
    tag = "outbox",
    request_body = DispatchRequest,
    responses(
        (status = 200, description = "Batch outcome", body = DispatchSummary),
    )
)]
pub async fn dispatch_events(
    State(state): State<AppState>,
    request: Option<Json<DispatchRequest>>,
) -> ApiResult<Json<DispatchSummary>> {
    let batch_size = request.and_then(|Json(r)| r.batch_size);
    let summary = state.dispatcher.dispatch_pending(batch_size).await?;
    Ok(Json(summary))
}

/// Per-status outbox counts.
#[utoipa::path(
    get,
    path = "/citybus/outbox/stats",
    tag = "outbox",
    responses(
        (status = 200, description = "Counts by status", body = OutboxStats),
    )
)]
pub async fn outbox_stats(State(state): State<AppState>) -> ApiResult<Json<OutboxStats>> {
    Ok(Json(state.outbox.stats().await?))
}

/// Most recent outbox events, newest first.
#[utoipa::path(
    get,
    path = "/citybus/outbox/recent",
    tag = "outbox",
    params(RecentQuery),
    responses(
        (status = 200, description = "Recent events", body = [OutboxEventResponse]),
    )
)]
pub async fn recent_events(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Json<Vec<OutboxEventResponse>>> {
    let limit = query.limit.unwrap_or(20).min(100);
    let events = state.outbox.recent(limit).await?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}
