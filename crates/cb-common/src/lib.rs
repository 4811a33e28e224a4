//! CityBus shared types.
//!
//! The outbox event model, the versioned envelope that rides inside it,
//! integration-log records, adapter outcomes, and the backoff policy.

pub mod error;
pub mod node_context;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use error::{CityBusError, Result};
pub use node_context::NodeContext;

// ============================================================================
// Outbox Event
// ============================================================================

/// Lifecycle status of an outbox event.
///
/// Forward-only transitions: `pending -> in_flight -> published` or
/// `pending -> in_flight -> failed -> ... -> dead_letter`. `in_flight` is the
/// transient claim state held while a dispatcher invocation owns the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    InFlight,
    Published,
    Failed,
    DeadLetter,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::InFlight => "in_flight",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
            OutboxStatus::DeadLetter => "dead_letter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "in_flight" => Some(OutboxStatus::InFlight),
            "published" => Some(OutboxStatus::Published),
            "failed" => Some(OutboxStatus::Failed),
            "dead_letter" => Some(OutboxStatus::DeadLetter),
            _ => None,
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Published | OutboxStatus::DeadLetter)
    }
}

/// A durable outbox event, one row in the `outbox` table.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OutboxEvent {
    pub id: i64,
    pub event_id: String,
    pub event_type: String,
    pub tenant_id: Option<String>,
    /// The full versioned envelope, immutable after creation.
    pub envelope: Envelope,
    pub correlation_id: Option<String>,
    pub node_context: Option<NodeContext>,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    pub fn is_published(&self) -> bool {
        self.status == OutboxStatus::Published
    }

    pub fn is_dead_letter(&self) -> bool {
        self.status == OutboxStatus::DeadLetter
    }

    /// Compute the state this event moves to after one more failed attempt.
    pub fn next_failure_state(&self, now: DateTime<Utc>) -> FailureTransition {
        let retry_count = self.retry_count + 1;
        if retry_count >= self.max_retries {
            FailureTransition {
                status: OutboxStatus::DeadLetter,
                retry_count,
                next_retry_at: None,
            }
        } else {
            FailureTransition {
                status: OutboxStatus::Failed,
                retry_count,
                next_retry_at: Some(now + retry_backoff(retry_count)),
            }
        }
    }
}

/// Outcome of applying the backoff policy to a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureTransition {
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Exponential backoff: 10s base, doubling per attempt (20s, 40s, 80s, ...).
///
/// `retry_count` is the count after increment, so the first failure yields 20s.
pub fn retry_backoff(retry_count: u32) -> Duration {
    // Cap the shift so pathological retry counts cannot overflow.
    let exp = retry_count.min(24);
    Duration::seconds(10 * (1i64 << exp))
}

/// Default retry ceiling for new events.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

// ============================================================================
// Envelope
// ============================================================================

/// Versioned event envelope, built once at publish time and never mutated.
/// Retries resend the same envelope bytes.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Envelope {
    pub event_id: String,
    pub event_type: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub source: EnvelopeSource,
    pub node_context: NodeContext,
    pub correlation: Correlation,
    /// Opaque domain data supplied by the producer.
    pub payload: serde_json::Value,
    pub metadata: EnvelopeMetadata,
}

/// Originating system identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvelopeSource {
    pub system: String,
    pub service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Correlation {
    pub correlation_id: String,
    pub causation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvelopeMetadata {
    pub retry_count: u32,
    pub first_published: DateTime<Utc>,
    pub idempotency_key: Option<String>,
}

// ============================================================================
// Dispatch Summary & Stats
// ============================================================================

/// Result of one dispatcher invocation. Always complete, even when every
/// event in the batch failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DispatchSummary {
    pub published: u32,
    pub failed: u32,
    pub total: u32,
}

/// Per-status counts over the outbox table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OutboxStats {
    pub pending: u64,
    pub in_flight: u64,
    pub published: u64,
    pub failed: u64,
    pub dead_letter: u64,
    pub total: u64,
}

// ============================================================================
// Integration Log
// ============================================================================

/// Direction of an integration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogDirection {
    Outbound,
    Inbound,
}

impl LogDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogDirection::Outbound => "outbound",
            LogDirection::Inbound => "inbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "outbound" => Some(LogDirection::Outbound),
            "inbound" => Some(LogDirection::Inbound),
            _ => None,
        }
    }
}

/// Outcome recorded for an integration call. `Stub` marks calls that were
/// logged but not sent because the downstream is not configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    Error,
    Stub,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
            CallStatus::Stub => "stub",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(CallStatus::Success),
            "error" => Some(CallStatus::Error),
            "stub" => Some(CallStatus::Stub),
            _ => None,
        }
    }
}

/// Write model for one outbound call attempt.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IntegrationLogEntry {
    pub integration: String,
    pub operation: String,
    pub direction: LogDirection,
    pub status: CallStatus,
    pub correlation_id: Option<String>,
    pub request_data: Option<serde_json::Value>,
    pub response_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub response_code: Option<i32>,
    pub duration_ms: Option<f64>,
}

impl IntegrationLogEntry {
    /// A successful outbound call with a fresh correlation id.
    pub fn outbound(integration: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            integration: integration.into(),
            operation: operation.into(),
            direction: LogDirection::Outbound,
            status: CallStatus::Success,
            correlation_id: Some(uuid::Uuid::new_v4().to_string()),
            request_data: None,
            response_data: None,
            error_message: None,
            response_code: None,
            duration_ms: None,
        }
    }

    pub fn with_status(mut self, status: CallStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_request(mut self, request: serde_json::Value) -> Self {
        self.request_data = Some(request);
        self
    }

    pub fn with_response(mut self, response: serde_json::Value) -> Self {
        self.response_data = Some(response);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.status = CallStatus::Error;
        self.error_message = Some(message.into());
        self
    }

    pub fn with_response_code(mut self, code: i32) -> Self {
        self.response_code = Some(code);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Read model: a stored integration log row.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IntegrationLogRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub entry: IntegrationLogEntry,
}

// ============================================================================
// Adapter Outcomes
// ============================================================================

/// Acknowledgement from a downstream adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterAck {
    pub accepted: bool,
    pub run_id: Option<String>,
}

impl AdapterAck {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            run_id: None,
        }
    }

    pub fn with_run_id(run_id: impl Into<String>) -> Self {
        Self {
            accepted: true,
            run_id: Some(run_id.into()),
        }
    }
}

/// Classification of a downstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    /// Could not reach the downstream at all.
    Connection,
    /// The call exceeded its bounded timeout.
    Timeout,
    /// The downstream answered with a non-success response.
    Rejected,
}

impl std::fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterErrorKind::Connection => write!(f, "connection"),
            AdapterErrorKind::Timeout => write!(f, "timeout"),
            AdapterErrorKind::Rejected => write!(f, "rejected"),
        }
    }
}

/// Tagged downstream failure. The dispatcher matches on the tag instead of
/// catching exceptions; every kind feeds the same backoff policy.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Connection,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Rejected,
            message: message.into(),
        }
    }
}

pub type AdapterResult = std::result::Result<AdapterAck, AdapterError>;
