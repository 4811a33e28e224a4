//! Event routing.
//!
//! A static, closed mapping from event type to downstream action, evaluated
//! at dispatch time so routing rules can evolve without rewriting stored
//! events. Types outside the mapping are a deliberate no-op success.

use std::sync::Arc;

use cb_common::{AdapterError, IntegrationLogEntry, OutboxEvent};
use tracing::{debug, warn};

use crate::adapters::{LedgerAdapter, LedgerOperation, WorkflowAdapter};
use crate::integration_log::IntegrationLogger;

/// The closed set of event kinds with a downstream mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    DeliveryCreated,
    DeliveryDispatched,
    DeliveryFailed,
    ProviderRegistered,
    DeliveryCompleted,
    CodCollected,
    SlaPenalty,
}

impl EventKind {
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "DELIVERY_CREATED" => Some(EventKind::DeliveryCreated),
            "DELIVERY_DISPATCHED" => Some(EventKind::DeliveryDispatched),
            "DELIVERY_FAILED" => Some(EventKind::DeliveryFailed),
            "PROVIDER_REGISTERED" => Some(EventKind::ProviderRegistered),
            "DELIVERY_COMPLETED" => Some(EventKind::DeliveryCompleted),
            "COD_COLLECTED" => Some(EventKind::CodCollected),
            "SLA_PENALTY" => Some(EventKind::SlaPenalty),
            _ => None,
        }
    }

    /// Workflow template for workflow-triggering kinds.
    pub fn workflow_template(&self) -> Option<&'static str> {
        match self {
            EventKind::DeliveryCreated => Some("DeliveryDispatchOrchestration"),
            EventKind::DeliveryDispatched => Some("DeliveryTrackingWorkflow"),
            EventKind::DeliveryFailed => Some("DeliveryExceptionEscalation"),
            EventKind::ProviderRegistered => Some("ProviderOnboardingApproval"),
            _ => None,
        }
    }

    /// Ledger operation for ledger-posting kinds.
    pub fn ledger_operation(&self) -> Option<LedgerOperation> {
        match self {
            EventKind::DeliveryCompleted => Some(LedgerOperation::DeliverySettlement),
            EventKind::CodCollected => Some(LedgerOperation::CodCollection),
            EventKind::SlaPenalty => Some(LedgerOperation::SlaPenalty),
            _ => None,
        }
    }
}

/// Downstream action resolved for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    StartWorkflow {
        template: &'static str,
        /// Deterministic per event: `{event_type}-{event_id}`.
        instance_id: String,
    },
    PostLedger {
        operation: LedgerOperation,
    },
    /// Unmapped type: no downstream call, treated as successfully routed.
    NoOp,
}

/// Pure routing function; testable in isolation.
pub fn plan_route(event_type: &str, event_id: &str) -> RouteAction {
    let Some(kind) = EventKind::parse(event_type) else {
        return RouteAction::NoOp;
    };

    if let Some(template) = kind.workflow_template() {
        return RouteAction::StartWorkflow {
            template,
            instance_id: format!("{}-{}", event_type, event_id),
        };
    }
    if let Some(operation) = kind.ledger_operation() {
        return RouteAction::PostLedger { operation };
    }
    RouteAction::NoOp
}

/// Resolves and invokes the downstream action for an event. Adapters are
/// explicit dependencies supplied at startup.
pub struct EventRouter {
    workflow: Arc<dyn WorkflowAdapter>,
    ledger: Arc<dyn LedgerAdapter>,
    log: IntegrationLogger,
}

impl EventRouter {
    pub fn new(
        workflow: Arc<dyn WorkflowAdapter>,
        ledger: Arc<dyn LedgerAdapter>,
        log: IntegrationLogger,
    ) -> Self {
        Self {
            workflow,
            ledger,
            log,
        }
    }

    /// Route one event. Success and no-op both append one integration log
    /// entry; a downstream failure is returned for the dispatcher's backoff
    /// policy (the adapter records its own failed attempt).
    pub async fn route(&self, event: &OutboxEvent) -> Result<(), AdapterError> {
        match plan_route(&event.event_type, &event.event_id) {
            RouteAction::StartWorkflow {
                template,
                instance_id,
            } => {
                let input = serde_json::to_value(&event.envelope)
                    .map_err(|e| AdapterError::rejected(format!("envelope encode: {}", e)))?;
                let ack = self
                    .workflow
                    .start_workflow_instance(template, &instance_id, &input)
                    .await?;
                if !ack.accepted {
                    return Err(AdapterError::rejected(format!(
                        "workflow instance {} not accepted",
                        instance_id
                    )));
                }
                debug!(template, instance_id = %instance_id, "workflow started");
            }
            RouteAction::PostLedger { operation } => {
                // Ledger systems receive the inner domain payload; fall back
                // to the whole envelope for events without one.
                let body = if event.envelope.payload.is_null() {
                    serde_json::to_value(&event.envelope)
                        .map_err(|e| AdapterError::rejected(format!("envelope encode: {}", e)))?
                } else {
                    event.envelope.payload.clone()
                };
                let ack = self.ledger.post(operation, &body).await?;
                if !ack.accepted {
                    return Err(AdapterError::rejected(format!(
                        "ledger operation {} not accepted",
                        operation.as_str()
                    )));
                }
                debug!(operation = operation.as_str(), "ledger entry posted");
            }
            RouteAction::NoOp => {
                warn!(
                    event_type = %event.event_type,
                    event_id = %event.event_id,
                    "no route for event type, treating as published"
                );
            }
        }

        let mut entry = IntegrationLogEntry::outbound("citybus", "dispatch_event").with_request(
            serde_json::json!({
                "event_type": event.event_type,
                "event_id": event.event_id,
            }),
        );
        if let Some(correlation_id) = &event.correlation_id {
            entry = entry.with_correlation_id(correlation_id.clone());
        }
        self.log.record(entry).await;

        Ok(())
    }
}
