//! HTTP clients for the systems CityBus dispatches into: the workflow
//! orchestrator and the financial ledger. Both implement the adapter traits
//! from `cb-outbox` and record every attempt in the integration log.

pub mod ledger;
pub mod temporal;

pub use ledger::{LedgerClient, LedgerClientConfig};
pub use temporal::{TemporalClientConfig, TemporalWorkflowClient};

use serde::Serialize;
use utoipa::ToSchema;

/// Connection summary for one downstream, as reported by the status API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IntegrationStatus {
    pub name: &'static str,
    pub configured: bool,
    /// `live` when calls go over the wire, `stub` when they are recorded
    /// locally and acknowledged.
    pub mode: &'static str,
    pub target: Option<String>,
}
