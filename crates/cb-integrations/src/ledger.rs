//! Financial ledger (ERP) client.
//!
//! Posts settlement, COD collection, and SLA penalty entries to the ledger's
//! REST API with token authentication. When no endpoint is configured the
//! client runs in stub mode: every post is acknowledged locally and recorded
//! in the integration log with `stub` status, so the event pipeline keeps
//! moving in environments without a ledger.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use cb_common::{
    AdapterAck, AdapterError, AdapterResult, CallStatus, CityBusError, IntegrationLogEntry, Result,
};
use cb_outbox::{IntegrationLogger, LedgerAdapter, LedgerOperation};
use tracing::{debug, info, warn};

use crate::IntegrationStatus;

#[derive(Debug, Clone)]
pub struct LedgerClientConfig {
    /// Ledger base URL; `None` selects stub mode.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for LedgerClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            api_secret: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl LedgerClientConfig {
    /// Unconfigured client running in stub mode.
    pub fn stub() -> Self {
        Self::default()
    }
}

pub struct LedgerClient {
    config: LedgerClientConfig,
    client: reqwest::Client,
    log: IntegrationLogger,
}

impl LedgerClient {
    pub fn new(config: LedgerClientConfig, log: IntegrationLogger) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CityBusError::configuration(format!("ledger http client: {}", e)))?;

        if config.base_url.is_none() {
            info!("ledger endpoint not configured, running in stub mode");
        }

        Ok(Self {
            config,
            client,
            log,
        })
    }

    pub fn is_stub(&self) -> bool {
        self.config.base_url.is_none()
    }

    pub fn status(&self) -> IntegrationStatus {
        IntegrationStatus {
            name: "erpnext",
            configured: !self.is_stub(),
            mode: if self.is_stub() { "stub" } else { "live" },
            target: self.config.base_url.clone(),
        }
    }

    async fn post_live(
        &self,
        base_url: &str,
        operation: LedgerOperation,
        payload: &serde_json::Value,
    ) -> std::result::Result<(AdapterAck, Option<u16>), (AdapterError, Option<u16>)> {
        let url = format!("{}/api/method/citybus.{}", base_url, operation.as_str());
        let mut request = self.client.post(&url).json(payload);
        if let (Some(key), Some(secret)) = (&self.config.api_key, &self.config.api_secret) {
            request = request.header("Authorization", format!("token {}:{}", key, secret));
        }

        let response = request.send().await.map_err(|e| {
            let err = if e.is_timeout() {
                AdapterError::timeout(format!("ledger post timed out: {}", e))
            } else {
                AdapterError::connection(format!("ledger post failed: {}", e))
            };
            (err, None)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, operation = operation.as_str(), "ledger post rejected");
            return Err((
                AdapterError::rejected(format!("HTTP {}: {}", status, body)),
                Some(status.as_u16()),
            ));
        }

        debug!(operation = operation.as_str(), "ledger entry posted");
        Ok((AdapterAck::accepted(), Some(status.as_u16())))
    }
}

#[async_trait]
impl LedgerAdapter for LedgerClient {
    async fn post(&self, operation: LedgerOperation, payload: &serde_json::Value) -> AdapterResult {
        let mut entry = IntegrationLogEntry::outbound("erpnext", operation.as_str())
            .with_request(payload.clone());

        let Some(base_url) = self.config.base_url.clone() else {
            debug!(operation = operation.as_str(), "ledger stub acknowledged");
            self.log.record(entry.with_status(CallStatus::Stub)).await;
            return Ok(AdapterAck::accepted());
        };

        let started = Instant::now();
        let outcome = self.post_live(&base_url, operation, payload).await;
        entry = entry.with_duration_ms(started.elapsed().as_secs_f64() * 1000.0);

        let result = match outcome {
            Ok((ack, code)) => {
                if let Some(code) = code {
                    entry = entry.with_response_code(code as i32);
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
