//! SQLite-backed repositories.
//!
//! Timestamps are stored as epoch milliseconds, structured columns as
//! serialized JSON text. The claim step is a single `UPDATE .. RETURNING`,
//! which SQLite executes atomically.

use async_trait::async_trait;
use cb_common::{
    CallStatus, CityBusError, Envelope, FailureTransition, IntegrationLogEntry,
    IntegrationLogRecord, LogDirection, NodeContext, OutboxEvent, OutboxStats, OutboxStatus,
    Result,
};
use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::info;

use crate::repository::{IntegrationLogRepository, LogFilter, NewOutboxEvent, OutboxRepository};

pub struct SqliteOutboxRepository {
    pool: SqlitePool,
}

impl SqliteOutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS outbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL UNIQUE,
                event_type TEXT NOT NULL,
                tenant_id TEXT,
                payload TEXT NOT NULL,
                correlation_id TEXT,
                node_context TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 5,
                error_message TEXT,
                published_at BIGINT,
                next_retry_at BIGINT,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox(status, next_retry_at);
            CREATE INDEX IF NOT EXISTS idx_outbox_tenant ON outbox(tenant_id);
            CREATE INDEX IF NOT EXISTS idx_outbox_event_type ON outbox(event_type);

            CREATE TABLE IF NOT EXISTS integration_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                integration TEXT NOT NULL,
                operation TEXT NOT NULL,
                direction TEXT NOT NULL DEFAULT 'outbound',
                status TEXT NOT NULL DEFAULT 'success',
                correlation_id TEXT,
                request_data TEXT,
                response_data TEXT,
                error_message TEXT,
                response_code INTEGER,
                duration_ms REAL,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_integration_logs_integration
                ON integration_logs(integration);
            CREATE INDEX IF NOT EXISTS idx_integration_logs_integration_status
                ON integration_logs(integration, status);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Run a business callback and the outbox insert in one transaction.
    /// A failure on either side rolls back both.
    pub async fn publish_atomic<T: Send>(
        &self,
        event: &NewOutboxEvent,
        business: impl for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>> + Send,
    ) -> Result<(T, OutboxEvent)> {
        let mut tx = self.pool.begin().await?;
        let business_result = business(&mut *tx).await?;
        let stored = insert_pending_tx(&mut *tx, event).await?;
        tx.commit().await?;
        Ok((business_result, stored))
    }
}

/// Insert a pending event on an existing connection, for callers composing
/// their own transaction around the business change and the insert.
pub async fn insert_pending_tx(
    conn: &mut SqliteConnection,
    event: &NewOutboxEvent,
) -> Result<OutboxEvent> {
    let now = Utc::now();
    let envelope_json = serde_json::to_string(&event.envelope)?;
    let node_context_json = event
        .node_context
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let row = sqlx::query(
        r#"
        INSERT INTO outbox
            (event_id, event_type, tenant_id, payload, correlation_id, node_context,
             status, retry_count, max_retries, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&event.event_id)
    .bind(&event.event_type)
    .bind(&event.tenant_id)
    .bind(&envelope_json)
    .bind(&event.correlation_id)
    .bind(&node_context_json)
    .bind(event.max_retries as i64)
    .bind(now.timestamp_millis())
    .bind(now.timestamp_millis())
    .fetch_one(&mut *conn)
    .await?;

    Ok(OutboxEvent {
        id: row.get::<i64, _>("id"),
        event_id: event.event_id.clone(),
        event_type: event.event_type.clone(),
        tenant_id: event.tenant_id.clone(),
        envelope: event.envelope.clone(),
        correlation_id: event.correlation_id.clone(),
        node_context: event.node_context.clone(),
        status: OutboxStatus::Pending,
        retry_count: 0,
        max_retries: event.max_retries,
        error_message: None,
        published_at: None,
        next_retry_at: None,
        created_at: now,
        updated_at: now,
    })
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| CityBusError::internal(format!("invalid timestamp: {}", ms)))
}

fn row_to_event(row: &SqliteRow) -> Result<OutboxEvent> {
    let payload: String = row.get("payload");
    let envelope: Envelope = serde_json::from_str(&payload)?;
    let node_context: Option<NodeContext> = row
        .get::<Option<String>, _>("node_context")
        .map(|s| serde_json::from_str(&s))
        .transpose()?;
    let status_str: String = row.get("status");
    let status = OutboxStatus::parse(&status_str)
        .ok_or_else(|| CityBusError::internal(format!("unknown outbox status: {}", status_str)))?;

    Ok(OutboxEvent {
        id: row.get("id"),
        event_id: row.get("event_id"),
        event_type: row.get("event_type"),
        tenant_id: row.get("tenant_id"),
        envelope,
        correlation_id: row.get("correlation_id"),
        node_context,
        status,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        max_retries: row.get::<i64, _>("max_retries") as u32,
        error_message: row.get("error_message"),
        published_at: row
            .get::<Option<i64>, _>("published_at")
            .map(millis_to_datetime)
            .transpose()?,
        next_retry_at: row
            .get::<Option<i64>, _>("next_retry_at")
            .map(millis_to_datetime)
            .transpose()?,
        created_at: millis_to_datetime(row.get("created_at"))?,
        updated_at: millis_to_datetime(row.get("updated_at"))?,
    })
}

#[async_trait]
impl OutboxRepository for SqliteOutboxRepository {
    async fn insert_pending(&self, event: &NewOutboxEvent) -> Result<OutboxEvent> {
        let mut conn = self.pool.acquire().await?;
        insert_pending_tx(&mut conn, event).await
    }

    async fn claim_due(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            r#"
            UPDATE outbox SET status = 'in_flight', updated_at = ?
            WHERE id IN (
                SELECT id FROM outbox
                WHERE status = 'pending'
                   OR (status = 'failed' AND next_retry_at <= ? AND retry_count < max_retries)
                ORDER BY created_at ASC, id ASC
                LIMIT ?
            )
            RETURNING *
            "#,
        )
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut events = rows
            .iter()
            .map(row_to_event)
            .collect::<Result<Vec<_>>>()?;
        // RETURNING order is unspecified; re-establish FIFO.
        events.sort_by_key(|e| (e.created_at, e.id));
        Ok(events)
    }

    async fn mark_published(&self, event_id: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'published', published_at = ?, next_retry_at = NULL, updated_at = ?
            WHERE event_id = ?
            "#,
        )
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        event_id: &str,
        transition: &FailureTransition,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET status = ?, retry_count = ?, error_message = ?, next_retry_at = ?, updated_at = ?
            WHERE event_id = ?
            "#,
        )
        .bind(transition.status.as_str())
        .bind(transition.retry_count as i64)
        .bind(error_message)
        .bind(transition.next_retry_at.map(|t| t.timestamp_millis()))
        .bind(now.timestamp_millis())
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recover_stuck(&self, older_than: Duration, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = (now - older_than).timestamp_millis();
        let result = sqlx::query(
            "UPDATE outbox SET status = 'pending', updated_at = ? WHERE status = 'in_flight' AND updated_at < ?",
        )
        .bind(now.timestamp_millis())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            info!(recovered, "recovered stuck outbox claims (SQLite)");
        }
        Ok(recovered)
    }

    async fn stats(&self) -> Result<OutboxStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM outbox GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = OutboxStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count = row.get::<i64, _>("count") as u64;
            match OutboxStatus::parse(&status) {
                Some(OutboxStatus::Pending) => stats.pending = count,
                Some(OutboxStatus::InFlight) => stats.in_flight = count,
                Some(OutboxStatus::Published) => stats.published = count,
                Some(OutboxStatus::Failed) => stats.failed = count,
                Some(OutboxStatus::DeadLetter) => stats.dead_letter = count,
                None => {}
            }
            stats.total += count;
        }
        Ok(stats)
    }

    async fn recent(&self, limit: u32) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query("SELECT * FROM outbox ORDER BY created_at DESC, id DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_event).collect()
    }

    async fn find_by_event_id(&self, event_id: &str) -> Result<Option<OutboxEvent>> {
        let row = sqlx::query("SELECT * FROM outbox WHERE event_id = ?")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_event).transpose()
    }
}

fn row_to_log_record(row: &SqliteRow) -> Result<IntegrationLogRecord> {
    let direction_str: String = row.get("direction");
    let status_str: String = row.get("status");
    let request_data: Option<serde_json::Value> = row
        .get::<Option<String>, _>("request_data")
        .map(|s| serde_json::from_str(&s))
        .transpose()?;
    let response_data: Option<serde_json::Value> = row
        .get::<Option<String>, _>("response_data")
        .map(|s| serde_json::from_str(&s))
        .transpose()?;

    Ok(IntegrationLogRecord {
        id: row.get("id"),
        created_at: millis_to_datetime(row.get("created_at"))?,
        entry: IntegrationLogEntry {
            integration: row.get("integration"),
            operation: row.get("operation"),
            direction: LogDirection::parse(&direction_str).unwrap_or(LogDirection::Outbound),
            status: CallStatus::parse(&status_str).unwrap_or(CallStatus::Error),
            correlation_id: row.get("correlation_id"),
            request_data,
            response_data,
            error_message: row.get("error_message"),
            response_code: row.get("response_code"),
            duration_ms: row.get("duration_ms"),
        },
    })
}

#[async_trait]
impl IntegrationLogRepository for SqliteOutboxRepository {
    async fn append(&self, entry: &IntegrationLogEntry) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let request_json = entry
            .request_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let response_json = entry
            .response_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO integration_logs
                (integration, operation, direction, status, correlation_id,
                 request_data, response_data, error_message, response_code, duration_ms,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.integration)
        .bind(&entry.operation)
        .bind(entry.direction.as_str())
        .bind(entry.status.as_str())
        .bind(&entry.correlation_id)
        .bind(&request_json)
        .bind(&response_json)
        .bind(&entry.error_message)
        .bind(entry.response_code)
        .bind(entry.duration_ms)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, filter: &LogFilter) -> Result<Vec<IntegrationLogRecord>> {
        let mut sql = String::from("SELECT * FROM integration_logs WHERE 1 = 1");
        if filter.integration.is_some() {
            sql.push_str(" AND integration = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(integration) = &filter.integration {
            query = query.bind(integration);
        }
        if let Some(status) = &filter.status {
            query = query.bind(status.as_str());
        }
        query = query.bind(filter.limit as i64);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_log_record).collect()
    }
}
