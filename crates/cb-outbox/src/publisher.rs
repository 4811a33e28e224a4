//! Envelope builder and publisher.
//!
//! Wraps a raw domain payload plus the request's node context into a
//! versioned envelope and inserts a pending outbox row. The envelope is
//! built exactly once; retries resend the same bytes.

use std::sync::Arc;

use cb_common::{
    CityBusError, Correlation, Envelope, EnvelopeMetadata, EnvelopeSource, NodeContext,
    OutboxEvent, Result, DEFAULT_MAX_RETRIES,
};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::repository::{NewOutboxEvent, OutboxRepository};

/// Identifies this service in every envelope it emits.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub source_system: String,
    pub source_service: String,
    pub max_retries: u32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            source_system: "cityos".to_string(),
            source_service: "citybus".to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

pub struct EventPublisher {
    repository: Arc<dyn OutboxRepository>,
    config: PublisherConfig,
}

impl EventPublisher {
    pub fn new(repository: Arc<dyn OutboxRepository>, config: PublisherConfig) -> Self {
        Self { repository, config }
    }

    /// Build the insertable event without persisting it. Used directly by
    /// callers that run the insert inside their own transaction; see
    /// [`crate::sqlite::insert_pending_tx`] and the Postgres counterpart.
    ///
    /// Rejects malformed requests (empty event type, non-object payload)
    /// before any row is written.
    pub fn build_event(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        node_context: NodeContext,
        tenant_id: Option<String>,
    ) -> Result<NewOutboxEvent> {
        if event_type.trim().is_empty() {
            return Err(CityBusError::validation("event_type must not be empty"));
        }
        if !payload.is_object() {
            return Err(CityBusError::validation("payload must be a JSON object"));
        }

        let event_id = Uuid::new_v4().to_string();
        let correlation_id = payload
            .get("correlation_id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let causation_id = payload
            .get("causation_id")
            .and_then(|v| v.as_str())
            .map(String::from);
        let idempotency_key = payload
            .get("idempotency_key")
            .and_then(|v| v.as_str())
            .map(String::from);

        let now = Utc::now();
        let envelope = Envelope {
            event_id: event_id.clone(),
            event_type: event_type.to_string(),
            version: "1.0".to_string(),
            timestamp: now,
            source: EnvelopeSource {
                system: self.config.source_system.clone(),
                service: self.config.source_service.clone(),
            },
            node_context: node_context.clone(),
            correlation: Correlation {
                correlation_id: correlation_id.clone(),
                causation_id,
            },
            payload,
            metadata: EnvelopeMetadata {
                retry_count: 0,
                first_published: now,
                idempotency_key,
            },
        };

        Ok(NewOutboxEvent {
            event_id,
            event_type: event_type.to_string(),
            tenant_id,
            envelope,
            correlation_id: Some(correlation_id),
            node_context: Some(node_context),
            max_retries: self.config.max_retries,
        })
    }

    /// Persist a new pending event. One durable row, no network calls.
    pub async fn publish(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        node_context: NodeContext,
        tenant_id: Option<String>,
    ) -> Result<OutboxEvent> {
        let event = self.build_event(event_type, payload, node_context, tenant_id)?;
        let stored = self.repository.insert_pending(&event).await?;
        debug!(
            event_id = %stored.event_id,
            event_type = %stored.event_type,
            "outbox event published"
        );
        Ok(stored)
    }
}
