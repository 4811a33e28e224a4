//! Repository traits over the two persisted tables.

use async_trait::async_trait;
use cb_common::{
    CallStatus, Envelope, FailureTransition, IntegrationLogEntry, IntegrationLogRecord,
    NodeContext, OutboxEvent, OutboxStats, Result, DEFAULT_MAX_RETRIES,
};
use chrono::{DateTime, Duration, Utc};

/// An event about to be inserted; the store assigns `id` and timestamps.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub event_id: String,
    pub event_type: String,
    pub tenant_id: Option<String>,
    pub envelope: Envelope,
    pub correlation_id: Option<String>,
    pub node_context: Option<NodeContext>,
    pub max_retries: u32,
}

impl NewOutboxEvent {
    pub fn default_max_retries() -> u32 {
        DEFAULT_MAX_RETRIES
    }
}

/// Durable store of outbox events.
///
/// `claim_due` is the single atomic claim step: it moves due rows to
/// `in_flight` and returns them, so two concurrent dispatcher invocations
/// can never process the same event.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn insert_pending(&self, event: &NewOutboxEvent) -> Result<OutboxEvent>;

    /// Atomically claim up to `limit` due events (pending, or failed with an
    /// elapsed `next_retry_at` and retries remaining), oldest first.
    async fn claim_due(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<OutboxEvent>>;

    async fn mark_published(&self, event_id: &str, now: DateTime<Utc>) -> Result<()>;

    async fn mark_failed(
        &self,
        event_id: &str,
        transition: &FailureTransition,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Return `in_flight` rows whose claim is older than the visibility
    /// timeout to `pending`. Crash hygiene; returns the number recovered.
    async fn recover_stuck(&self, older_than: Duration, now: DateTime<Utc>) -> Result<u64>;

    async fn stats(&self) -> Result<OutboxStats>;

    /// Most recent events, newest first.
    async fn recent(&self, limit: u32) -> Result<Vec<OutboxEvent>>;

    async fn find_by_event_id(&self, event_id: &str) -> Result<Option<OutboxEvent>>;
}

/// Filters for listing integration log entries.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub integration: Option<String>,
    pub status: Option<CallStatus>,
    pub limit: u32,
}

impl LogFilter {
    pub fn new(limit: u32) -> Self {
        Self {
            integration: None,
            status: None,
            limit,
        }
    }
}

/// Append-only record of outbound call attempts. Read only by
/// observability surfaces, never by the dispatcher.
#[async_trait]
pub trait IntegrationLogRepository: Send + Sync {
    async fn append(&self, entry: &IntegrationLogEntry) -> Result<()>;

    /// Newest first, bounded by `filter.limit`.
    async fn list(&self, filter: &LogFilter) -> Result<Vec<IntegrationLogRecord>>;
}
