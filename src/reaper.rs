//! Housekeeping for the outbox table.
//!
//! The relay never resurrects a record on its own. The reaper is the
//! separate policy that does: it releases locks left behind by dead workers
//! and re-arms failed records that are still under the retry cap. Both are
//! conditional updates, so they are safe to run while relays are sweeping.

use crate::claim::stale_before;
use crate::error::{Error, Result};
use crate::model::{RecordId, Status};
use crate::store::OutboxStore;
use crate::telemetry::metrics;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Reaper<S> {
    store: Arc<S>,
    stale_after: Duration,
    max_attempts: u32,
}

impl<S: OutboxStore> Reaper<S> {
    pub fn new(store: Arc<S>, stale_after: Duration, max_attempts: u32) -> Self {
        Self {
            store,
            stale_after,
            max_attempts,
        }
    }

    /// Return locks untouched for longer than `stale_after` to pending.
    pub async fn reap_stale(&self) -> Result<u64> {
        let now = Utc::now();
        let reset = self
            .store
            .reset_stale(stale_before(now, self.stale_after), now)
            .await?;
        if reset > 0 {
            info!(count = reset, "released stale locks");
            record("reset_stale", reset);
        }
        Ok(reset)
    }

    /// Re-arm one failed record. Returns false if the record is not failed
    /// or has used up its attempts.
    pub async fn rearm(&self, id: RecordId) -> Result<bool> {
        let rearmed = self.store.rearm(id, self.max_attempts, Utc::now()).await? == 1;
        if rearmed {
            info!(%id, "re-armed failed record");
            record("rearm", 1);
        }
        Ok(rearmed)
    }

    /// Re-arm up to `limit` failed records still under the retry cap.
    pub async fn rearm_all(&self, limit: i64) -> Result<u64> {
        let mut rearmed = 0;
        for id in self.store.rearmable(self.max_attempts, limit).await? {
            // Another reaper may have got there first.
            if self.rearm(id).await? {
                rearmed += 1;
            }
        }
        Ok(rearmed)
    }

    /// Delete terminal records last modified before `older_than`.
    pub async fn purge(&self, status: Status, older_than: DateTime<Utc>) -> Result<u64> {
        if !status.is_terminal() {
            return Err(Error::Other(format!(
                "only success or fail records can be purged, not {status}"
            )));
        }
        let purged = self.store.purge(status, older_than).await?;
        if purged > 0 {
            info!(count = purged, %status, "purged records");
            record("purge", purged);
        }
        Ok(purged)
    }
}

fn record(operation: &'static str, count: u64) {
    metrics::housekeeping().add(count, &[KeyValue::new("operation", operation)]);
}
