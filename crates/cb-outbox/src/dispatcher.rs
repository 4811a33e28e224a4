//! Dispatcher: drains due outbox events through the router.
//!
//! One attempt per event per invocation. Downstream failures feed the
//! backoff/dead-letter policy and are never raised to the caller, which
//! always receives a complete summary. Store failures do propagate.

use std::sync::Arc;

use cb_common::{DispatchSummary, Result};
use chrono::{Duration, Utc};
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::repository::OutboxRepository;
use crate::router::EventRouter;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub default_batch_size: u32,
    /// Claims older than this are considered abandoned and recovered.
    pub stuck_claim_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 50,
            stuck_claim_timeout: Duration::minutes(5),
        }
    }
}

pub struct Dispatcher {
    repository: Arc<dyn OutboxRepository>,
    router: EventRouter,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        router: EventRouter,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            repository,
            router,
            config,
        }
    }

    /// Claim and process one batch of due events, oldest first.
    pub async fn dispatch_pending(&self, batch_size: Option<u32>) -> Result<DispatchSummary> {
        let limit = batch_size.unwrap_or(self.config.default_batch_size);
        let events = self.repository.claim_due(limit, Utc::now()).await?;

        let mut summary = DispatchSummary {
            total: events.len() as u32,
            ..DispatchSummary::default()
        };

        for event in events {
            match self.router.route(&event).await {
                Ok(()) => {
                    self.repository
                        .mark_published(&event.event_id, Utc::now())
                        .await?;
                    summary.published += 1;
                }
                Err(e) => {
                    let now = Utc::now();
                    let transition = event.next_failure_state(now);
                    debug!(
                        event_id = %event.event_id,
                        retry_count = transition.retry_count,
                        status = transition.status.as_str(),
                        error = %e,
                        "dispatch attempt failed"
                    );
                    self.repository
                        .mark_failed(&event.event_id, &transition, &e.to_string(), now)
                        .await?;
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Scheduled drive loop: recover abandoned claims, then dispatch a
    /// batch, forever. Intended to run alongside the on-demand API.
    pub async fn run(&self, poll_interval: std::time::Duration) {
        info!("starting outbox dispatcher loop");
        loop {
            match self
                .repository
                .recover_stuck(self.config.stuck_claim_timeout, Utc::now())
                .await
            {
                Ok(recovered) if recovered > 0 => {
                    info!(recovered, "recovered stuck outbox claims");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "stuck-claim recovery failed"),
            }

            match self.dispatch_pending(None).await {
                Ok(summary) if summary.total > 0 => {
                    info!(
                        published = summary.published,
                        failed = summary.failed,
                        total = summary.total,
                        "dispatched outbox batch"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "outbox batch dispatch failed"),
            }

            sleep(poll_interval).await;
        }
    }
}
