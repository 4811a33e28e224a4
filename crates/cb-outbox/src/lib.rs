//! CityBus transactional outbox.
//!
//! Producers record events durably through the [`EventPublisher`], in the
//! same transaction as the business change when atomicity matters. A
//! [`Dispatcher`] later claims due events, routes each one to its downstream
//! action through the [`router`], and applies the backoff/dead-letter policy
//! on failure. Every outbound attempt is recorded in the append-only
//! integration log.

pub mod adapters;
pub mod dispatcher;
pub mod integration_log;
pub mod postgres;
pub mod publisher;
pub mod repository;
pub mod router;
pub mod sqlite;

pub use adapters::{LedgerAdapter, LedgerOperation, WorkflowAdapter};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use integration_log::IntegrationLogger;
pub use publisher::EventPublisher;
pub use repository::{IntegrationLogRepository, LogFilter, NewOutboxEvent, OutboxRepository};
pub use router::{plan_route, EventKind, EventRouter, RouteAction};
