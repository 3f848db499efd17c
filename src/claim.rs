//! Claim manager: optimistic claiming of outbox records.
//!
//! A claim is one conditional update, "set Locked/mine WHERE id = X AND the
//! record is still claimable". Exactly one of any number of racing workers
//! sees an affected-row count of 1; everyone else gets [`Claim::Lost`] and
//! skips the record. Losing a race is the normal outcome under contention
//! and is never an error.
//!
//! Stale-lock recovery uses the same discipline: a reset only applies to
//! rows whose `modified_date` is older than the stale threshold, so it cannot
//! steal a record that a live worker has just claimed.

use crate::error::Result;
use crate::model::{LockId, OutboxRecord, Status};
use crate::store::OutboxStore;
use crate::telemetry::metrics;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Result of a claim attempt.
#[derive(Debug)]
pub enum Claim {
    /// This worker owns the record; it is returned as it now stands.
    Acquired(Box<OutboxRecord>),
    /// Another worker won, or the record was resolved since it was fetched.
    Lost,
}

impl Claim {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Claim::Acquired(_))
    }
}

/// Claims records on behalf of one worker.
pub struct ClaimManager<S> {
    store: Arc<S>,
    lock_id: LockId,
    stale_after: Duration,
}

impl<S> Clone for ClaimManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            lock_id: self.lock_id.clone(),
            stale_after: self.stale_after,
        }
    }
}

impl<S: OutboxStore> ClaimManager<S> {
    pub fn new(store: Arc<S>, lock_id: LockId, stale_after: Duration) -> Self {
        Self {
            store,
            lock_id,
            stale_after,
        }
    }

    /// Token written into `lock_id` by this worker's claims.
    pub fn lock_id(&self) -> &LockId {
        &self.lock_id
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Locks older than this instant are considered abandoned.
    pub fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        stale_before(now, self.stale_after)
    }

    /// Attempt to take ownership of `record`.
    pub async fn try_claim(&self, record: &OutboxRecord, now: DateTime<Utc>) -> Result<Claim> {
        let affected = self
            .store
            .claim(record.id, &self.lock_id, now, self.stale_before(now))
            .await?;

        if affected == 0 {
            debug!(id = %record.id, lock_id = %self.lock_id, "claim lost");
            metrics::claims().add(1, &[KeyValue::new("result", "lost")]);
            return Ok(Claim::Lost);
        }

        metrics::claims().add(1, &[KeyValue::new("result", "acquired")]);

        let mut claimed = record.clone();
        claimed.status = Status::Locked;
        claimed.lock_id = Some(self.lock_id.clone());
        claimed.attempts += 1;
        claimed.modified_date = now;
        Ok(Claim::Acquired(Box::new(claimed)))
    }

    /// Release every lock older than the stale threshold back to pending.
    pub async fn reset_stale(&self, now: DateTime<Utc>) -> Result<u64> {
        self.store
            .reset_stale(self.stale_before(now), now)
            .await
    }
}

/// `now - stale_after`, saturating to the earliest representable instant.
pub(crate) fn stale_before(now: DateTime<Utc>, stale_after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(stale_after)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
