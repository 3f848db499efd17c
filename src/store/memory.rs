//! In-process outbox table.
//!
//! Each operation runs under one mutex, which gives it the same
//! all-or-nothing conditional-update semantics as a single SQL statement.
//! Used for tests and for embedding the relay without a database.

use super::OutboxStore;
use crate::error::{Error, Result};
use crate::model::{LockId, OutboxRecord, RecordId, Resolution, Status};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<RecordId, OutboxRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<MutexGuard<'_, HashMap<RecordId, OutboxRecord>>> {
        self.records
            .lock()
            .map_err(|_| Error::Other("outbox store mutex poisoned".to_string()))
    }
}

fn is_claimable(record: &OutboxRecord, stale_before: DateTime<Utc>) -> bool {
    match record.status {
        Status::Pending => record.lock_id.is_none(),
        Status::Locked => record.modified_date < stale_before,
        Status::Success | Status::Fail => false,
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn insert(&self, record: &OutboxRecord) -> Result<()> {
        let mut records = self.records()?;
        if records.contains_key(&record.id) {
            return Err(Error::Other(format!("duplicate outbox record {}", record.id)));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: RecordId) -> Result<Option<OutboxRecord>> {
        Ok(self.records()?.get(&id).cloned())
    }

    async fn list(&self, status: Option<Status>, limit: i64) -> Result<Vec<OutboxRecord>> {
        let mut items: Vec<_> = self
            .records()?
            .values()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_date.cmp(&a.created_date));
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn fetch_candidates(
        &self,
        limit: i64,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>> {
        let mut items: Vec<_> = self
            .records()?
            .values()
            .filter(|r| is_claimable(r, stale_before))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_date.cmp(&b.created_date));
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn claim(
        &self,
        id: RecordId,
        lock_id: &LockId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<u64> {
        let mut records = self.records()?;
        match records.get_mut(&id) {
            Some(record) if is_claimable(record, stale_before) => {
                record.status = Status::Locked;
                record.lock_id = Some(lock_id.clone());
                record.attempts += 1;
                record.modified_date = now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn finish(
        &self,
        id: RecordId,
        lock_id: &LockId,
        resolution: &Resolution,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut records = self.records()?;
        match records.get_mut(&id) {
            Some(record)
                if record.status == Status::Locked && record.lock_id.as_ref() == Some(lock_id) =>
            {
                record.status = resolution.status();
                record.error_message = resolution.error_message().map(str::to_string);
                record.modified_date = now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn reset_stale(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let mut reset = 0;
        for record in self.records()?.values_mut() {
            if record.status == Status::Locked && record.modified_date < stale_before {
                record.status = Status::Pending;
                record.lock_id = None;
                record.modified_date = now;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn rearm(&self, id: RecordId, max_attempts: u32, now: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records()?;
        match records.get_mut(&id) {
            Some(record) if record.status == Status::Fail && record.attempts < max_attempts => {
                record.status = Status::Pending;
                record.lock_id = None;
                record.error_message = None;
                record.modified_date = now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn rearmable(&self, max_attempts: u32, limit: i64) -> Result<Vec<RecordId>> {
        let mut failed: Vec<_> = self
            .records()?
            .values()
            .filter(|r| r.status == Status::Fail && r.attempts < max_attempts)
            .map(|r| (r.created_date, r.id))
            .collect();
        failed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(failed
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn purge(&self, status: Status, older_than: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records()?;
        let before = records.len();
        records.retain(|_, r| !(r.status == status && r.modified_date < older_than));
        Ok((before - records.len()) as u64)
    }
}
