//! Shared fixtures: a notification service registered with the relay.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use outbox_rs::model::{Invocation, OutboxRecord, RecordId};
use outbox_rs::registry::InvocationRegistry;
use outbox_rs::store::{InMemoryStore, OutboxStore};
use std::sync::{Arc, Mutex};

/// Records every message it is asked to deliver.
#[derive(Default)]
pub struct NotificationService {
    pub sent: Mutex<Vec<String>>,
}

impl NotificationService {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    async fn send(&self, text: String) -> Result<(), String> {
        if text == "boom" {
            return Err(format!("cannot deliver {text}"));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }
}

/// Registry with `NotificationService::{send, fail, ping}`.
pub fn registry(service: Arc<NotificationService>) -> InvocationRegistry {
    let mut registry = InvocationRegistry::empty();
    registry
        .service("NotificationService", service)
        .method("send", |svc, (text,): (String,)| async move {
            svc.send(text).await
        })
        .method("fail", |_svc, (_text,): (String,)| async move {
            Err::<(), _>("smtp relay unavailable")
        })
        .method("ping", |svc, (): ()| async move {
            svc.sent.lock().unwrap().push("ping".to_string());
            Ok::<(), String>(())
        });
    registry
}

pub fn send(text: &str) -> Invocation {
    Invocation::new("NotificationService", "send", (text.to_string(),)).unwrap()
}

/// Insert records for `invocations`, one millisecond apart, oldest first.
pub async fn enqueue_all(store: &InMemoryStore, invocations: Vec<Invocation>) -> Vec<RecordId> {
    let base = Utc::now() - Duration::seconds(10);
    let mut ids = Vec::new();
    for (i, invocation) in invocations.into_iter().enumerate() {
        let mut record = OutboxRecord::new(invocation);
        record.created_date = base + Duration::milliseconds(i as i64);
        record.modified_date = record.created_date;
        store.insert(&record).await.unwrap();
        ids.push(record.id);
    }
    ids
}

pub async fn get(store: &InMemoryStore, id: RecordId) -> OutboxRecord {
    store.get(id).await.unwrap().expect("record should exist")
}
