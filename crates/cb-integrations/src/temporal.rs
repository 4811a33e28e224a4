//! Workflow orchestrator client.
//!
//! Speaks the orchestrator's HTTP workflow-start API: one POST per instance,
//! with the envelope carried as a base64-encoded JSON payload. Instance ids
//! are supplied by the router and are deterministic per event, so a retried
//! event targets the same instance instead of spawning a duplicate.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use cb_common::{
    AdapterAck, AdapterError, AdapterResult, CityBusError, IntegrationLogEntry, Result,
};
use cb_outbox::{IntegrationLogger, WorkflowAdapter};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::IntegrationStatus;

#[derive(Debug, Clone)]
pub struct TemporalClientConfig {
    /// Orchestrator frontend base URL, e.g. `http://temporal:8233`.
    pub base_url: String,
    pub namespace: String,
    pub task_queue: String,
    /// Optional Bearer token.
    pub auth_token: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for TemporalClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            namespace: "default".to_string(),
            task_queue: "citybus".to_string(),
            auth_token: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StartWorkflowResponse {
    /// Newer frontends return `workflowRunId`, older ones `runId`.
    #[serde(rename = "workflowRunId")]
    workflow_run_id: Option<String>,
    #[serde(rename = "runId")]
    run_id: Option<String>,
}

impl StartWorkflowResponse {
    fn into_run_id(self) -> Option<String> {
        self.workflow_run_id.or(self.run_id)
    }
}

pub struct TemporalWorkflowClient {
    config: TemporalClientConfig,
    client: reqwest::Client,
    log: IntegrationLogger,
}

impl TemporalWorkflowClient {
    pub fn new(config: TemporalClientConfig, log: IntegrationLogger) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CityBusError::configuration(format!("workflow http client: {}", e)))?;

        Ok(Self {
            config,
            client,
            log,
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.base_url.is_empty()
    }

    pub fn status(&self) -> IntegrationStatus {
        IntegrationStatus {
            name: "temporal",
            configured: self.is_configured(),
            mode: if self.is_configured() {
                "live"
            } else {
                "unconfigured"
            },
            target: self
                .is_configured()
                .then(|| self.config.base_url.clone()),
        }
    }

    /// Workflow-start body: type and task queue by name, the instance id
    /// echoed as `workflowId`, a fresh `requestId` for server-side
    /// deduplication, and the input as a single base64 `json/plain` payload.
    fn start_body(
        &self,
        template: &str,
        instance_id: &str,
        request_id: &str,
        input: &serde_json::Value,
    ) -> serde_json::Value {
        serde_json::json!({
            "workflowType": { "name": template },
            "taskQueue": { "name": self.config.task_queue },
            "input": {
                "payloads": [{
                    "metadata": { "encoding": BASE64.encode("json/plain") },
                    "data": BASE64.encode(input.to_string()),
                }],
            },
            "workflowId": instance_id,
            "requestId": request_id,
        })
    }

    async fn call(
        &self,
        template: &str,
        instance_id: &str,
        request_id: &str,
        input: &serde_json::Value,
    ) -> std::result::Result<(AdapterAck, Option<u16>), (AdapterError, Option<u16>)> {
        if !self.is_configured() {
            return Err((
                AdapterError::connection("workflow orchestrator base URL is not configured"),
                None,
            ));
        }

        let url = format!(
            "{}/api/v1/namespaces/{}/workflows/{}",
            self.config.base_url, self.config.namespace, instance_id
        );
        let mut request = self
            .client
            .post(&url)
            .header("X-Namespace", &self.config.namespace)
            .json(&self.start_body(template, instance_id, request_id, input));
        if let Some(token) = &self.config.auth_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| {
            let err = if e.is_timeout() {
                AdapterError::timeout(format!("workflow start timed out: {}", e))
            } else {
                AdapterError::connection(format!("workflow start failed: {}", e))
            };
            (err, None)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, instance_id, "workflow start rejected");
            return Err((
                AdapterError::rejected(format!("HTTP {}: {}", status, body)),
                Some(status.as_u16()),
            ));
        }

        let run_id = response
            .json::<StartWorkflowResponse>()
            .await
            .ok()
            .and_then(StartWorkflowResponse::into_run_id);
        debug!(template, instance_id, run_id = run_id.as_deref(), "workflow started");

        let ack = match run_id {
            Some(run_id) => AdapterAck::with_run_id(run_id),
            None => AdapterAck::accepted(),
        };
        Ok((ack, Some(status.as_u16())))
    }
}

#[async_trait]
impl WorkflowAdapter for TemporalWorkflowClient {
    async fn start_workflow_instance(
        &self,
        template: &str,
        instance_id: &str,
        input: &serde_json::Value,
    ) -> AdapterResult {
        let started = Instant::now();
        let request_id = uuid::Uuid::new_v4().to_string();
        let outcome = self.call(template, instance_id, &request_id, input).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        // The requestId sent to the orchestrator doubles as the log
        // correlation id so a start can be traced end to end.
        let mut entry = IntegrationLogEntry::outbound("temporal", "start_workflow")
            .with_correlation_id(request_id)
            .with_request(serde_json::json!({
                "template": template,
                "instance_id": instance_id,
            }))
            .with_duration_ms(duration_ms);

        let result = match outcome {
            Ok((ack, code)) => {
                if let Some(code) = code {
                    entry = entry.with_response_code(code as i32);
                }
                if let Some(run_id) = &ack.run_id {
                    entry = entry.with_response(serde_json::json!({ "run_id": run_id }));
                }
                Ok(ack)
            }
            Err((err, code)) => {
                if let Some(code) = code {
                    entry = entry.with_response_code(code as i32);
                }
                entry = entry.with_error(err.to_string());
                Err(err)
            }
        };

        self.log.record(entry).await;
        result
    }
}
