//! HTTP-level tests over the assembled router with an in-memory store and
//! a stubbed ledger.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use cb_api::{router, AppState};
use cb_common::NodeContext;
use cb_context::{ContextConfig, ContextResolver, InMemoryTenantDirectory, Tenant};
use cb_integrations::{
    LedgerClient, LedgerClientConfig, TemporalClientConfig, TemporalWorkflowClient,
};
use cb_outbox::publisher::PublisherConfig;
use cb_outbox::sqlite::SqliteOutboxRepository;
use cb_outbox::{
    Dispatcher, DispatcherConfig, EventPublisher, EventRouter, IntegrationLogger,
    OutboxRepository,
};
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;

async fn app() -> (Router, Arc<SqliteOutboxRepository>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let repo = Arc::new(SqliteOutboxRepository::new(pool));
    repo.init_schema().await.unwrap();

    let logger = IntegrationLogger::new(repo.clone());
    let temporal = Arc::new(
        TemporalWorkflowClient::new(TemporalClientConfig::default(), logger.clone()).unwrap(),
    );
    let ledger = Arc::new(LedgerClient::new(LedgerClientConfig::stub(), logger.clone()).unwrap());
    let integrations = vec![temporal.status(), ledger.status()];

    let event_router = EventRouter::new(temporal, ledger, logger);
    let dispatcher = Arc::new(Dispatcher::new(
        repo.clone(),
        event_router,
        DispatcherConfig::default(),
    ));
    let publisher = Arc::new(EventPublisher::new(repo.clone(), PublisherConfig::default()));

    let acme = Tenant {
        id: "11111111-1111-1111-1111-111111111111".to_string(),
        handle: "acme".to_string(),
        name: "Acme Deliveries".to_string(),
        context: NodeContext {
            country: "SA".to_string(),
            city_or_theme: "riyadh".to_string(),
            sector: "logistics".to_string(),
            ..NodeContext::default()
        },
    };
    let resolver = Arc::new(ContextResolver::new(
        ContextConfig::default(),
        Arc::new(InMemoryTenantDirectory::new(vec![acme])),
    ));

    let state = AppState {
        outbox: repo.clone(),
        logs: repo.clone(),
        publisher,
        dispatcher,
        resolver,
        integrations: Arc::new(integrations),
    };
    (router(state), repo)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _) = app().await;
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn publish_creates_pending_event_and_echoes_tenant_headers() {
    let (app, repo) = app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/citybus/outbox/publish")
        .header("content-type", "application/json")
        .header("X-CityBus-Tenant", "acme")
        .body(Body::from(
            serde_json::json!({
                "event_type": "DELIVERY_CREATED",
                "payload": {"delivery_id": "D1"}
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers().get("x-citybus-tenant").unwrap(),
        "acme"
    );

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["event"]["status"], "pending");
    assert_eq!(body["event"]["eventType"], "DELIVERY_CREATED");

    // Tenant resolved through the directory and stamped on the row.
    let stored = repo
        .find_by_event_id(body["event"]["eventId"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.tenant_id.as_deref(),
        Some("11111111-1111-1111-1111-111111111111")
    );
    // Hierarchy fields enriched from the tenant.
    assert_eq!(stored.envelope.node_context.sector, "logistics");
}

#[tokio::test]
async fn publish_rejects_empty_event_type() {
    let (app, _) = app().await;
    let response = app
        .oneshot(post_json(
            "/citybus/outbox/publish",
            serde_json::json!({"event_type": "", "payload": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn publish_reads_context_fields_from_body() {
    let (app, repo) = app().await;
    let response = app
        .oneshot(post_json(
            "/citybus/outbox/publish",
            serde_json::json!({
                "event_type": "DELIVERY_CREATED",
                "payload": {"delivery_id": "D2"},
                "node_context": {"country": "AE", "cityOrTheme": "dubai"}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = json_body(response).await;
    let stored = repo
        .find_by_event_id(body["event"]["eventId"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.envelope.node_context.country, "AE");
    assert_eq!(stored.envelope.node_context.city_or_theme, "dubai");
}

#[tokio::test]
async fn dispatch_drains_due_events_through_the_stub_ledger() {
    let (app, _) = app().await;
    let response = app
        .clone()
        .oneshot(post_json(
            "/citybus/outbox/publish",
            serde_json::json!({
                "event_type": "DELIVERY_COMPLETED",
                "payload": {"delivery_id": "D3", "amount": 18.5}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(post_json("/citybus/outbox/dispatch", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary = json_body(response).await;
    assert_eq!(summary["published"], 1);
    assert_eq!(summary["failed"], 0);

    let response = app.oneshot(get("/citybus/outbox/stats")).await.unwrap();
    let stats = json_body(response).await;
    assert_eq!(stats["published"], 1);
    assert_eq!(stats["pending"], 0);
}

#[tokio::test]
async fn recent_returns_newest_first_and_honors_limit() {
    let (app, repo) = app().await;
    for (i, delivery) in ["D1", "D2"].iter().enumerate() {
        let response = app
            .clone()
            .oneshot(post_json(
                "/citybus/outbox/publish",
                serde_json::json!({
                    "event_type": "DELIVERY_CREATED",
                    "payload": {"delivery_id": delivery}
                }),
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        // Spread creation times so ordering is unambiguous.
        sqlx::query("UPDATE outbox SET created_at = ? WHERE event_id = ?")
            .bind(1_700_000_000_000i64 + i as i64)
            .bind(body["event"]["eventId"].as_str().unwrap())
            .execute(repo.pool())
            .await
            .unwrap();
    }

    let response = app
        .oneshot(get("/citybus/outbox/recent?limit=1"))
        .await
        .unwrap();
    let body = json_body(response).await;
    let events = body.as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["eventType"], "DELIVERY_CREATED");
}

#[tokio::test]
async fn integration_logs_filter_by_integration_and_status() {
    let (app, _) = app().await;
    app.clone()
        .oneshot(post_json(
            "/citybus/outbox/publish",
            serde_json::json!({
                "event_type": "COD_COLLECTED",
                "payload": {"delivery_id": "D4"}
            }),
        ))
        .await
        .unwrap();
    app.clone()
        .oneshot(post_json("/citybus/outbox/dispatch", serde_json::json!({})))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get(
            "/citybus/integration-logs?integration=erpnext&status=stub",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["operation"], "cod_collection");

    let response = app
        .oneshot(get("/citybus/integration-logs?status=bogus"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn integrations_status_lists_each_downstream() {
    let (app, _) = app().await;
    let response = app
        .oneshot(get("/citybus/integrations/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 2);

    let ledger = entries.iter().find(|e| e["name"] == "erpnext").unwrap();
    assert_eq!(ledger["mode"], "stub");
    assert_eq!(ledger["configured"], false);
    let temporal = entries.iter().find(|e| e["name"] == "temporal").unwrap();
    assert_eq!(temporal["mode"], "unconfigured");
    assert_eq!(temporal["configured"], false);
}
