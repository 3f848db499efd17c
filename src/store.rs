//! Storage contract for the outbox table.
//!
//! Every mutation after creation is a single conditional update whose
//! affected-row count is the source of truth. Cross-worker coordination
//! relies entirely on the store applying each update atomically; no lock is
//! held in this process.

pub mod memory;

use crate::error::Result;
use crate::model::{LockId, OutboxRecord, RecordId, Resolution, Status};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::InMemoryStore;

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persist a freshly created record.
    async fn insert(&self, record: &OutboxRecord) -> Result<()>;

    async fn get(&self, id: RecordId) -> Result<Option<OutboxRecord>>;

    /// Records newest first, optionally filtered by status.
    async fn list(&self, status: Option<Status>, limit: i64) -> Result<Vec<OutboxRecord>>;

    /// Claimable records, oldest first: pending ones, plus locked ones whose
    /// `modified_date` is older than `stale_before`.
    async fn fetch_candidates(
        &self,
        limit: i64,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>>;

    /// Pending (or stale locked) → Locked by `lock_id`, attempts + 1.
    async fn claim(
        &self,
        id: RecordId,
        lock_id: &LockId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<u64>;

    /// Locked by `lock_id` → Success or Fail. Zero rows means the lock was
    /// reaped and possibly re-claimed by someone else.
    async fn finish(
        &self,
        id: RecordId,
        lock_id: &LockId,
        resolution: &Resolution,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Locked with `modified_date < stale_before` → Pending, lock cleared.
    async fn reset_stale(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64>;

    /// Fail with `attempts < max_attempts` → Pending, lock and error cleared.
    async fn rearm(&self, id: RecordId, max_attempts: u32, now: DateTime<Utc>) -> Result<u64>;

    /// Ids of failed records still under the retry cap, oldest first.
    async fn rearmable(&self, max_attempts: u32, limit: i64) -> Result<Vec<RecordId>>;

    /// Delete terminal records of `status` last modified before `older_than`.
    async fn purge(&self, status: Status, older_than: DateTime<Utc>) -> Result<u64>;
}
