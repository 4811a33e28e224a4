//! CityBus HTTP API.
//!
//! All `/citybus` routes pass through node-context resolution; the resolved
//! context rides on request extensions and is echoed back in response
//! headers when a tenant was named.

pub mod error;
pub mod logs;
pub mod openapi;
pub mod outbox;
pub mod status;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use cb_context::middleware::resolve_node_context;
use cb_context::ContextResolver;
use cb_integrations::IntegrationStatus;
use cb_outbox::{Dispatcher, EventPublisher, IntegrationLogRepository, OutboxRepository};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Clone)]
pub struct AppState {
    pub outbox: Arc<dyn OutboxRepository>,
    pub logs: Arc<dyn IntegrationLogRepository>,
    pub publisher: Arc<EventPublisher>,
    pub dispatcher: Arc<Dispatcher>,
    pub resolver: Arc<ContextResolver>,
    /// Downstream status snapshot, fixed at startup.
    pub integrations: Arc<Vec<IntegrationStatus>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    tag = "monitoring",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "citybus",
    })
}

/// Assemble the application router.
pub fn router(state: AppState) -> Router {
    let citybus = Router::new()
        .route("/outbox/publish", post(outbox::publish_event))
        .route("/outbox/dispatch", post(outbox::dispatch_events))
        .route("/outbox/stats", get(outbox::outbox_stats))
        .route("/outbox/recent", get(outbox::recent_events))
        .route("/integration-logs", get(logs::list_integration_logs))
        .route("/integrations/status", get(status::integrations_status))
        .layer(axum::middleware::from_fn_with_state(
            state.resolver.clone(),
            resolve_node_context,
        ))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health))
        .nest("/citybus", citybus)
}
