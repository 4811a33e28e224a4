//! Append-only integration log sink.

use std::sync::Arc;

use cb_common::IntegrationLogEntry;
use tracing::error;

use crate::repository::IntegrationLogRepository;

/// Records outbound call attempts. A logging failure must never abort the
/// operation it describes, so append errors are reported and swallowed.
#[derive(Clone)]
pub struct IntegrationLogger {
    repo: Arc<dyn IntegrationLogRepository>,
}

impl IntegrationLogger {
    pub fn new(repo: Arc<dyn IntegrationLogRepository>) -> Self {
        Self { repo }
    }

    pub async fn record(&self, entry: IntegrationLogEntry) {
        if let Err(e) = self.repo.append(&entry).await {
            error!(
                integration = %entry.integration,
                operation = %entry.operation,
                error = %e,
                "failed to append integration log entry"
            );
        }
    }
}
