use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cb_common::{AdapterErrorKind, CallStatus, IntegrationLogEntry, IntegrationLogRecord, Result};
use cb_integrations::{
    LedgerClient, LedgerClientConfig, TemporalClientConfig, TemporalWorkflowClient,
};
use cb_outbox::{
    IntegrationLogRepository, IntegrationLogger, LedgerAdapter, LedgerOperation, LogFilter,
    WorkflowAdapter,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct MemLogRepo {
    entries: Mutex<Vec<IntegrationLogEntry>>,
}

#[async_trait]
impl IntegrationLogRepository for MemLogRepo {
    async fn append(&self, entry: &IntegrationLogEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn list(&self, filter: &LogFilter) -> Result<Vec<IntegrationLogRecord>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .rev()
            .take(filter.limit as usize)
            .enumerate()
            .map(|(i, entry)| IntegrationLogRecord {
                id: i as i64,
                created_at: Utc::now(),
                entry: entry.clone(),
            })
            .collect())
    }
}

fn temporal_client(base_url: &str, log_repo: Arc<MemLogRepo>) -> TemporalWorkflowClient {
    let config = TemporalClientConfig {
        base_url: base_url.to_string(),
        namespace: "cityos".to_string(),
        task_queue: "citybus".to_string(),
        auth_token: Some("secret-token".to_string()),
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
    };
    TemporalWorkflowClient::new(config, IntegrationLogger::new(log_repo)).unwrap()
}

#[tokio::test]
async fn workflow_start_sends_auth_and_returns_run_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(
            "/api/v1/namespaces/cityos/workflows/DELIVERY_CREATED-e1",
        ))
        .and(header("Authorization", "Bearer secret-token"))
        .and(header("X-Namespace", "cityos"))
        .and(body_partial_json(serde_json::json!({
            "workflowType": { "name": "DeliveryDispatchOrchestration" },
            "taskQueue": { "name": "citybus" },
            "workflowId": "DELIVERY_CREATED-e1",
            "input": {
                "payloads": [{
                    "metadata": { "encoding": BASE64.encode("json/plain") },
                    "data": BASE64.encode(serde_json::json!({"event_id": "e1"}).to_string()),
                }],
            },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "runId": "run-42"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let log_repo = Arc::new(MemLogRepo::default());
    let client = temporal_client(&server.uri(), log_repo.clone());

    let ack = client
        .start_workflow_instance(
            "DeliveryDispatchOrchestration",
            "DELIVERY_CREATED-e1",
            &serde_json::json!({"event_id": "e1"}),
        )
        .await
        .unwrap();

    assert!(ack.accepted);
    assert_eq!(ack.run_id.as_deref(), Some("run-42"));

    let entries = log_repo.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].integration, "temporal");
    assert_eq!(entries[0].operation, "start_workflow");
    assert_eq!(entries[0].status, CallStatus::Success);
    assert_eq!(entries[0].response_code, Some(200));
    assert!(entries[0].duration_ms.is_some());
}

#[tokio::test]
async fn each_start_carries_a_fresh_request_id_used_as_correlation_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(2)
        .mount(&server)
        .await;

    let log_repo = Arc::new(MemLogRepo::default());
    let client = temporal_client(&server.uri(), log_repo.clone());
    for event in ["e1", "e2"] {
        client
            .start_workflow_instance(
                "DeliveryDispatchOrchestration",
                &format!("DELIVERY_CREATED-{}", event),
                &serde_json::json!({"event_id": event}),
            )
            .await
            .unwrap();
    }

    let requests = server.received_requests().await.unwrap();
    let request_ids: Vec<String> = requests
        .iter()
        .map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
            body["requestId"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(request_ids.len(), 2);
    assert!(!request_ids[0].is_empty());
    assert_ne!(request_ids[0], request_ids[1]);

    // The log entry for each start is correlated by its requestId.
    let entries = log_repo.entries.lock().unwrap();
    assert_eq!(entries[0].correlation_id.as_deref(), Some(request_ids[0].as_str()));
    assert_eq!(entries[1].correlation_id.as_deref(), Some(request_ids[1].as_str()));
}

#[tokio::test]
async fn run_id_read_from_workflow_run_id_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "workflowRunId": "run-77"
        })))
        .mount(&server)
        .await;

    let log_repo = Arc::new(MemLogRepo::default());
    let client = temporal_client(&server.uri(), log_repo);
    let ack = client
        .start_workflow_instance(
            "DeliveryTrackingWorkflow",
            "DELIVERY_DISPATCHED-e4",
            &serde_json::json!({}),
        )
        .await
        .unwrap();
    assert_eq!(ack.run_id.as_deref(), Some("run-77"));
}

#[tokio::test]
async fn server_error_is_a_rejection_and_logged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let log_repo = Arc::new(MemLogRepo::default());
    let client = temporal_client(&server.uri(), log_repo.clone());

    let err = client
        .start_workflow_instance("DeliveryTrackingWorkflow", "DELIVERY_DISPATCHED-e2", &serde_json::json!({}))
        .await
        .unwrap_err();

    assert_eq!(err.kind, AdapterErrorKind::Rejected);
    assert!(err.message.contains("502"));

    let entries = log_repo.entries.lock().unwrap();
    assert_eq!(entries[0].status, CallStatus::Error);
    assert_eq!(entries[0].response_code, Some(502));
    assert!(entries[0].error_message.is_some());
}

#[tokio::test]
async fn unreachable_orchestrator_is_a_connection_error() {
    let log_repo = Arc::new(MemLogRepo::default());
    // Nothing listens on this port.
    let client = temporal_client("http://127.0.0.1:1", log_repo.clone());

    let err = client
        .start_workflow_instance("DeliveryTrackingWorkflow", "DELIVERY_DISPATCHED-e3", &serde_json::json!({}))
        .await
        .unwrap_err();

    assert!(matches!(
        err.kind,
        AdapterErrorKind::Connection | AdapterErrorKind::Timeout
    ));
    assert_eq!(log_repo.entries.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unconfigured_client_fails_without_network() {
    let log_repo = Arc::new(MemLogRepo::default());
    let client = TemporalWorkflowClient::new(
        TemporalClientConfig::default(),
        IntegrationLogger::new(log_repo.clone()),
    )
    .unwrap();

    assert!(!client.is_configured());
    let status = client.status();
    assert_eq!(status.mode, "unconfigured");
    assert!(!status.configured);
    assert!(status.target.is_none());

    let err = client
        .start_workflow_instance("DeliveryTrackingWorkflow", "x", &serde_json::json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind, AdapterErrorKind::Connection);
}

#[tokio::test]
async fn configured_client_reports_live_mode() {
    let log_repo = Arc::new(MemLogRepo::default());
    let client = temporal_client("http://temporal:8233", log_repo);
    let status = client.status();
    assert_eq!(status.mode, "live");
    assert!(status.configured);
    assert_eq!(status.target.as_deref(), Some("http://temporal:8233"));
}

#[tokio::test]
async fn ledger_stub_acknowledges_and_logs_stub_status() {
    let log_repo = Arc::new(MemLogRepo::default());
    let client = LedgerClient::new(
        LedgerClientConfig::stub(),
        IntegrationLogger::new(log_repo.clone()),
    )
    .unwrap();

    assert!(client.is_stub());
    let ack = client
        .post(
            LedgerOperation::DeliverySettlement,
            &serde_json::json!({"delivery_id": "D1", "amount": 42.0}),
        )
        .await
        .unwrap();
    assert!(ack.accepted);

    let entries = log_repo.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].integration, "erpnext");
    assert_eq!(entries[0].operation, "delivery_settlement");
    assert_eq!(entries[0].status, CallStatus::Stub);
}

#[test]
fn ledger_default_config_keeps_bounded_timeouts() {
    let config = LedgerClientConfig::default();
    assert_eq!(config.connect_timeout, Duration::from_secs(10));
    assert_eq!(config.request_timeout, Duration::from_secs(30));
    assert!(config.base_url.is_none());
}

#[tokio::test]
async fn ledger_live_posts_with_token_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/method/citybus.cod_collection"))
        .and(header("Authorization", "token key-1:secret-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"message": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let log_repo = Arc::new(MemLogRepo::default());
    let client = LedgerClient::new(
        LedgerClientConfig {
            base_url: Some(server.uri()),
            api_key: Some("key-1".to_string()),
            api_secret: Some("secret-1".to_string()),
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(2),
        },
        IntegrationLogger::new(log_repo.clone()),
    )
    .unwrap();

    let ack = client
        .post(
            LedgerOperation::CodCollection,
            &serde_json::json!({"delivery_id": "D2"}),
        )
        .await
        .unwrap();
    assert!(ack.accepted);

    let entries = log_repo.entries.lock().unwrap();
    assert_eq!(entries[0].status, CallStatus::Success);
    assert_eq!(entries[0].response_code, Some(200));
}
