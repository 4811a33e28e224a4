//! OpenAPI documentation for the CityBus API.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "CityBus API",
        version = "1.0.0",
        description = "Transactional outbox and dispatch for the CityOS directory"
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "outbox", description = "Event publishing and dispatch"),
        (name = "integrations", description = "Downstream integrations and call logs"),
        (name = "monitoring", description = "Health")
    ),
    paths(
        crate::outbox::publish_event,
        crate::outbox::dispatch_events,
        crate::outbox::outbox_stats,
        crate::outbox::recent_events,
        crate::logs::list_integration_logs,
        crate::status::integrations_status,
        crate::health,
    )
)]
pub struct ApiDoc;
