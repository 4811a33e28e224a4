//! Downstream adapter contracts.
//!
//! Adapters are constructed at startup and passed into the router as
//! explicit dependencies. Each call returns a tagged result; the dispatcher
//! matches on it rather than catching panics or inspecting raw errors.

use async_trait::async_trait;
use cb_common::AdapterResult;

/// Workflow orchestrator collaborator.
#[async_trait]
pub trait WorkflowAdapter: Send + Sync {
    /// Start a workflow instance from a named template. `instance_id` is
    /// deterministic per event, so redelivery of the same event targets the
    /// same instance.
    async fn start_workflow_instance(
        &self,
        template: &str,
        instance_id: &str,
        input: &serde_json::Value,
    ) -> AdapterResult;
}

/// Closed set of ledger operations an event can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOperation {
    DeliverySettlement,
    CodCollection,
    SlaPenalty,
}

impl LedgerOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerOperation::DeliverySettlement => "delivery_settlement",
            LedgerOperation::CodCollection => "cod_collection",
            LedgerOperation::SlaPenalty => "sla_penalty",
        }
    }
}

/// Financial ledger collaborator. One operation per routing-table entry.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    async fn post(&self, operation: LedgerOperation, payload: &serde_json::Value) -> AdapterResult;
}
