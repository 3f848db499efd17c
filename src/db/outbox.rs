//! Outbox table operations via direct SQLx.
//!
//! Every state change is one `UPDATE ... WHERE <guard>` statement and the
//! caller reads `rows_affected()`. Postgres re-checks the guard after waiting
//! on a concurrent writer's row lock, so of two racing claims exactly one
//! matches.

use crate::error::{Error, Result};
use crate::model::{Invocation, LockId, OutboxRecord, RecordId, Resolution, Status};
use crate::store::OutboxStore;
use crate::telemetry::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

const COLUMNS: &str = "id, service_class, method_name, param_types, param_values, lock_id, status, error_message, attempts, created_date, modified_date";

/// Pending, or locked by a worker that stopped touching it before the
/// instant bound to `stale_param`.
fn claimable(stale_param: &str) -> String {
    format!(
        "((status IS NULL AND lock_id IS NULL) OR (status = 0 AND modified_date < {stale_param}))"
    )
}

/// Insert an invocation inside the caller's transaction.
///
/// The row becomes visible to relays only if the caller commits, which is
/// what ties the invocation to the business change it accompanies.
pub async fn enqueue_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    invocation: &Invocation,
) -> Result<RecordId> {
    let record = OutboxRecord::new(invocation.clone());
    insert_on(&mut **tx, &record).await?;
    metrics::enqueued().add(
        1,
        &[KeyValue::new("target", invocation.target_type().to_string())],
    );
    Ok(record.id)
}

async fn insert_on<'e, E>(executor: E, record: &OutboxRecord) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO outbox (id, service_class, method_name, param_types, param_values, lock_id, status, error_message, attempts, created_date, modified_date)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(record.id.0)
    .bind(&record.target_type)
    .bind(&record.method_name)
    .bind(&record.param_types)
    .bind(&record.param_values)
    .bind(record.lock_id.as_ref().map(LockId::as_str))
    .bind(record.status.ordinal())
    .bind(&record.error_message)
    .bind(record.attempts as i32)
    .bind(record.created_date)
    .bind(record.modified_date)
    .execute(executor)
    .await?;
    Ok(())
}

impl super::Db {
    /// Enqueue an invocation in its own transaction.
    pub async fn enqueue(&self, invocation: &Invocation) -> Result<RecordId> {
        let mut tx = self.pool.begin().await?;
        let id = enqueue_in_tx(&mut tx, invocation).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// IDs whose text form starts with `prefix`, newest first.
    pub async fn find_by_prefix(&self, prefix: &str, limit: i64) -> Result<Vec<RecordId>> {
        let pattern = prefix
            .to_lowercase()
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM outbox
             WHERE id::text LIKE $1 || '%'
             ORDER BY created_date DESC
             LIMIT $2",
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| RecordId(id)).collect())
    }
}

#[async_trait]
impl OutboxStore for super::Db {
    async fn insert(&self, record: &OutboxRecord) -> Result<()> {
        insert_on(&self.pool, record).await
    }

    async fn get(&self, id: RecordId) -> Result<Option<OutboxRecord>> {
        let row: Option<OutboxRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM outbox WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        row.map(OutboxRow::try_into_record).transpose()
    }

    async fn list(&self, status: Option<Status>, limit: i64) -> Result<Vec<OutboxRecord>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM outbox
             WHERE (NOT $1 OR status IS NOT DISTINCT FROM $2)
             ORDER BY created_date DESC
             LIMIT $3"
        ))
        .bind(status.is_some())
        .bind(status.and_then(Status::ordinal))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OutboxRow::try_into_record).collect()
    }

    async fn fetch_candidates(
        &self,
        limit: i64,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM outbox
             WHERE {}
             ORDER BY created_date ASC
             LIMIT $1",
            claimable("$2")
        ))
        .bind(limit)
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OutboxRow::try_into_record).collect()
    }

    async fn claim(
        &self,
        id: RecordId,
        lock_id: &LockId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<u64> {
        let rows_affected = sqlx::query(&format!(
            "UPDATE outbox SET status = 0, lock_id = $2, attempts = attempts + 1, modified_date = $3
             WHERE id = $1 AND {}",
            claimable("$4")
        ))
        .bind(id.0)
        .bind(lock_id.as_str())
        .bind(now)
        .bind(stale_before)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected)
    }

    async fn finish(
        &self,
        id: RecordId,
        lock_id: &LockId,
        resolution: &Resolution,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let rows_affected = sqlx::query(
            "UPDATE outbox SET status = $3, error_message = $4, modified_date = $5
             WHERE id = $1 AND status = 0 AND lock_id = $2",
        )
        .bind(id.0)
        .bind(lock_id.as_str())
        .bind(resolution.status().ordinal())
        .bind(resolution.error_message())
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected)
    }

    async fn reset_stale(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let rows_affected = sqlx::query(
            "UPDATE outbox SET status = NULL, lock_id = NULL, modified_date = $2
             WHERE status = 0 AND modified_date < $1",
        )
        .bind(stale_before)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected)
    }

    async fn rearm(&self, id: RecordId, max_attempts: u32, now: DateTime<Utc>) -> Result<u64> {
        let rows_affected = sqlx::query(
            "UPDATE outbox SET status = NULL, lock_id = NULL, error_message = NULL, modified_date = $3
             WHERE id = $1 AND status = 2 AND attempts < $2",
        )
        .bind(id.0)
        .bind(max_attempts as i32)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected)
    }

    async fn rearmable(&self, max_attempts: u32, limit: i64) -> Result<Vec<RecordId>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM outbox
             WHERE status = 2 AND attempts < $1
             ORDER BY created_date ASC
             LIMIT $2",
        )
        .bind(max_attempts as i32)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| RecordId(id)).collect())
    }

    async fn purge(&self, status: Status, older_than: DateTime<Utc>) -> Result<u64> {
        let ordinal = status
            .ordinal()
            .ok_or_else(|| Error::Other(format!("cannot purge {status} records")))?;
        let rows_affected =
            sqlx::query("DELETE FROM outbox WHERE status = $1 AND modified_date < $2")
                .bind(ordinal)
                .bind(older_than)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(rows_affected)
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    service_class: String,
    method_name: String,
    param_types: String,
    param_values: String,
    lock_id: Option<String>,
    status: Option<i16>,
    error_message: Option<String>,
    attempts: i32,
    created_date: DateTime<Utc>,
    modified_date: DateTime<Utc>,
}

impl OutboxRow {
    fn try_into_record(self) -> Result<OutboxRecord> {
        Ok(OutboxRecord {
            id: RecordId(self.id),
            target_type: self.service_class,
            method_name: self.method_name,
            param_types: self.param_types,
            param_values: self.param_values,
            lock_id: self.lock_id.map(LockId::from),
            status: Status::from_ordinal(self.status)?,
            error_message: self.error_message,
            attempts: self.attempts.max(0) as u32,
            created_date: self.created_date,
            modified_date: self.modified_date,
        })
    }
}
