//! CityBus Server
//!
//! Serves the outbox HTTP API and runs the background dispatcher loop in
//! the same process.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CB_DB_TYPE` | `sqlite` | Database type: `sqlite`, `postgres` |
//! | `CB_DB_URL` | - | Database connection URL (required) |
//! | `CB_HTTP_PORT` | `8080` | API port |
//! | `CB_POLL_INTERVAL_MS` | `5000` | Dispatcher poll interval |
//! | `CB_BATCH_SIZE` | `50` | Max events per dispatch batch |
//! | `CB_STUCK_CLAIM_SECS` | `300` | Claim visibility timeout |
//! | `CB_TEMPORAL_URL` | - | Workflow orchestrator base URL |
//! | `CB_TEMPORAL_NAMESPACE` | `default` | Orchestrator namespace |
//! | `CB_TEMPORAL_TASK_QUEUE` | `citybus` | Orchestrator task queue |
//! | `CB_TEMPORAL_TOKEN` | - | Optional Bearer token |
//! | `CB_LEDGER_URL` | - | Ledger base URL (unset selects stub mode) |
//! | `CB_LEDGER_API_KEY` | - | Ledger API key |
//! | `CB_LEDGER_API_SECRET` | - | Ledger API secret |
//! | `CB_TENANTS_FILE` | - | JSON file seeding the tenant directory |
//! | `RUST_LOG` | `info` | Log level |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use cb_api::openapi::ApiDoc;
use cb_api::AppState;
use cb_common::NodeContext;
use cb_context::{ContextConfig, ContextResolver, InMemoryTenantDirectory, Tenant};
use cb_integrations::{
    LedgerClient, LedgerClientConfig, TemporalClientConfig, TemporalWorkflowClient,
};
use cb_outbox::publisher::PublisherConfig;
use cb_outbox::{
    Dispatcher, DispatcherConfig, EventPublisher, EventRouter, IntegrationLogRepository,
    IntegrationLogger, OutboxRepository,
};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{} environment variable is required", key))
}

struct Repositories {
    outbox: Arc<dyn OutboxRepository>,
    logs: Arc<dyn IntegrationLogRepository>,
}

async fn create_repositories(db_type: &str) -> Result<Repositories> {
    match db_type {
        "sqlite" => {
            let url = env_required("CB_DB_URL")?;
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&url)
                .await?;
            let repo = Arc::new(cb_outbox::sqlite::SqliteOutboxRepository::new(pool));
            repo.init_schema().await?;
            info!("Using SQLite outbox: {}", url);
            Ok(Repositories {
                outbox: repo.clone(),
                logs: repo,
            })
        }
        "postgres" => {
            let url = env_required("CB_DB_URL")?;
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await?;
            let repo = Arc::new(cb_outbox::postgres::PostgresOutboxRepository::new(pool));
            repo.init_schema().await?;
            info!("Using PostgreSQL outbox");
            Ok(Repositories {
                outbox: repo.clone(),
                logs: repo,
            })
        }
        other => Err(anyhow::anyhow!(
            "Unknown database type: {}. Use sqlite or postgres",
            other
        )),
    }
}

/// Seed file format for the tenant directory.
#[derive(Debug, Deserialize)]
struct TenantSeed {
    id: String,
    handle: String,
    name: String,
    #[serde(default)]
    context: NodeContext,
}

fn load_tenants() -> Result<Vec<Tenant>> {
    let Ok(path) = std::env::var("CB_TENANTS_FILE") else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(&path)?;
    let seeds: Vec<TenantSeed> = serde_json::from_str(&raw)?;
    info!("Loaded {} tenants from {}", seeds.len(), path);
    Ok(seeds
        .into_iter()
        .map(|s| Tenant {
            id: s.id,
            handle: s.handle,
            name: s.name,
            context: s.context,
        })
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Starting CityBus Server");

    let db_type = env_or("CB_DB_TYPE", "sqlite");
    let http_port: u16 = env_or_parse("CB_HTTP_PORT", 8080);
    let poll_interval_ms: u64 = env_or_parse("CB_POLL_INTERVAL_MS", 5000);
    let batch_size: u32 = env_or_parse("CB_BATCH_SIZE", 50);
    let stuck_claim_secs: i64 = env_or_parse("CB_STUCK_CLAIM_SECS", 300);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let repos = create_repositories(&db_type).await?;
    let logger = IntegrationLogger::new(repos.logs.clone());

    let temporal = Arc::new(TemporalWorkflowClient::new(
        TemporalClientConfig {
            base_url: env_or("CB_TEMPORAL_URL", ""),
            namespace: env_or("CB_TEMPORAL_NAMESPACE", "default"),
            task_queue: env_or("CB_TEMPORAL_TASK_QUEUE", "citybus"),
            auth_token: std::env::var("CB_TEMPORAL_TOKEN").ok(),
            ..TemporalClientConfig::default()
        },
        logger.clone(),
    )?);
    let ledger = Arc::new(LedgerClient::new(
        LedgerClientConfig {
            base_url: std::env::var("CB_LEDGER_URL").ok(),
            api_key: std::env::var("CB_LEDGER_API_KEY").ok(),
            api_secret: std::env::var("CB_LEDGER_API_SECRET").ok(),
            ..LedgerClientConfig::stub()
        },
        logger.clone(),
    )?);
    let integrations = vec![temporal.status(), ledger.status()];

    let event_router = EventRouter::new(temporal, ledger, logger);
    let dispatcher = Arc::new(Dispatcher::new(
        repos.outbox.clone(),
        event_router,
        DispatcherConfig {
            default_batch_size: batch_size,
            stuck_claim_timeout: chrono::Duration::seconds(stuck_claim_secs),
        },
    ));
    let publisher = Arc::new(EventPublisher::new(
        repos.outbox.clone(),
        PublisherConfig::default(),
    ));

    let resolver = Arc::new(ContextResolver::new(
        ContextConfig::default(),
        Arc::new(InMemoryTenantDirectory::new(load_tenants()?)),
    ));

    // Background dispatcher loop.
    let dispatcher_handle = {
        let dispatcher = dispatcher.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let poll_interval = Duration::from_millis(poll_interval_ms);
        tokio::spawn(async move {
            tokio::select! {
                _ = dispatcher.run(poll_interval) => {}
                _ = shutdown_rx.recv() => {
                    info!("Outbox dispatcher shutting down");
                }
            }
        })
    };

    let state = AppState {
        outbox: repos.outbox,
        logs: repos.logs,
        publisher,
        dispatcher,
        resolver,
        integrations: Arc::new(integrations),
    };

    let app = cb_api::router(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API listening on http://{}", addr);
    info!("Swagger UI at http://{}/docs", addr);

    let server_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        })
    };

    info!("CityBus Server started");
    shutdown_signal().await;
    info!("Shutdown signal received...");

    let _ = shutdown_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = dispatcher_handle.await;
        let _ = server_handle.await;
    })
    .await;

    info!("CityBus Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
