//! Claim exclusivity under concurrent workers.

mod support;

use chrono::{Duration as ChronoDuration, Utc};
use outbox_rs::claim::{Claim, ClaimManager};
use outbox_rs::model::{Invocation, LockId, OutboxRecord, Status};
use outbox_rs::registry::InvocationRegistry;
use outbox_rs::relay::{Relay, RelayConfig};
use outbox_rs::store::{InMemoryStore, OutboxStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use support::{enqueue_all, get, send};

fn manager(store: &Arc<InMemoryStore>, worker: &str) -> ClaimManager<InMemoryStore> {
    ClaimManager::new(
        Arc::clone(store),
        LockId::from(worker),
        Duration::from_secs(300),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_of_many_concurrent_claims_wins() {
    let store = Arc::new(InMemoryStore::new());
    let ids = enqueue_all(&store, vec![send("contended")]).await;
    let record = get(&store, ids[0]).await;

    let mut handles = Vec::new();
    for n in 0..16 {
        let claims = manager(&store, &format!("worker-{n}"));
        let record = record.clone();
        handles.push(tokio::spawn(async move {
            let claim = claims.try_claim(&record, Utc::now()).await.unwrap();
            (claims.lock_id().clone(), claim)
        }));
    }

    let mut winners = Vec::new();
    let mut losers = 0;
    for handle in handles {
        match handle.await.unwrap() {
            (lock_id, Claim::Acquired(_)) => winners.push(lock_id),
            (_, Claim::Lost) => losers += 1,
        }
    }

    assert_eq!(winners.len(), 1, "exactly one claim should win");
    assert_eq!(losers, 15);
    let stored = get(&store, ids[0]).await;
    assert_eq!(stored.status, Status::Locked);
    assert_eq!(stored.lock_id.as_ref(), Some(&winners[0]));
    assert_eq!(stored.attempts, 1);
}

#[tokio::test]
async fn losing_claim_has_no_side_effects() {
    let store = Arc::new(InMemoryStore::new());
    let ids = enqueue_all(&store, vec![send("race")]).await;
    let record = get(&store, ids[0]).await;

    let first = manager(&store, "worker-a")
        .try_claim(&record, Utc::now())
        .await
        .unwrap();
    let after_first = get(&store, ids[0]).await;

    let second = manager(&store, "worker-b")
        .try_claim(&record, Utc::now() + ChronoDuration::seconds(1))
        .await
        .unwrap();
    let after_second = get(&store, ids[0]).await;

    assert!(first.is_acquired());
    assert!(matches!(second, Claim::Lost));
    assert_eq!(after_second.lock_id, Some(LockId::from("worker-a")));
    assert_eq!(after_second.attempts, after_first.attempts);
    assert_eq!(after_second.modified_date, after_first.modified_date);
}

#[tokio::test]
async fn acquired_claim_reflects_stored_row() {
    let store = Arc::new(InMemoryStore::new());
    let ids = enqueue_all(&store, vec![send("mine")]).await;
    let record = get(&store, ids[0]).await;
    let now = Utc::now();

    let Claim::Acquired(claimed) = manager(&store, "worker-a").try_claim(&record, now).await.unwrap()
    else {
        panic!("expected claim to be acquired");
    };

    let stored = get(&store, ids[0]).await;
    assert_eq!(claimed.status, stored.status);
    assert_eq!(claimed.lock_id, stored.lock_id);
    assert_eq!(claimed.attempts, stored.attempts);
    assert_eq!(stored.modified_date, now);
}

#[tokio::test]
async fn terminal_records_cannot_be_claimed() {
    let store = Arc::new(InMemoryStore::new());
    for status in [Status::Success, Status::Fail] {
        let mut record = OutboxRecord::new(send("done"));
        record.status = status;
        record.lock_id = Some(LockId::from("old-worker"));
        record.modified_date = Utc::now() - ChronoDuration::days(1);
        store.insert(&record).await.unwrap();

        let claim = manager(&store, "worker-a")
            .try_claim(&record, Utc::now())
            .await
            .unwrap();
        assert!(matches!(claim, Claim::Lost), "{status} record was claimed");
    }
}

#[tokio::test]
async fn reset_only_touches_stale_locks() {
    let store = Arc::new(InMemoryStore::new());
    let ids = enqueue_all(&store, vec![send("old"), send("new")]).await;
    let claims = manager(&store, "worker-a");

    let old = get(&store, ids[0]).await;
    let an_hour_ago = Utc::now() - ChronoDuration::hours(1);
    claims.try_claim(&old, an_hour_ago).await.unwrap();
    let new = get(&store, ids[1]).await;
    claims.try_claim(&new, Utc::now()).await.unwrap();

    assert_eq!(claims.reset_stale(Utc::now()).await.unwrap(), 1);

    let old = get(&store, ids[0]).await;
    assert_eq!(old.status, Status::Pending);
    assert!(old.lock_id.is_none());
    let new = get(&store, ids[1]).await;
    assert_eq!(new.status, Status::Locked);
    assert_eq!(new.lock_id, Some(LockId::from("worker-a")));
}

/// Two relays sweeping the same table never invoke a record twice.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_relays_partition_the_batch() {
    let store = Arc::new(InMemoryStore::new());
    let calls: Arc<Mutex<HashMap<u32, usize>>> = Arc::default();

    let mut registry = InvocationRegistry::empty();
    registry
        .service("Counter", Arc::clone(&calls))
        .method("hit", |calls, (n,): (u32,)| async move {
            tokio::task::yield_now().await;
            *calls.lock().unwrap().entry(n).or_default() += 1;
            Ok::<(), String>(())
        });
    let registry = Arc::new(registry);

    let invocations = (0..40u32)
        .map(|n| Invocation::new("Counter", "hit", (n,)).unwrap())
        .collect();
    enqueue_all(&store, invocations).await;

    let relays: Vec<_> = (0..2)
        .map(|n| {
            Relay::new(
                Arc::clone(&store),
                Arc::clone(&registry),
                LockId::from(format!("relay-{n}")),
                RelayConfig::default(),
            )
        })
        .collect();

    let a = tokio::spawn({
        let relay = relays[0].clone();
        async move { relay.sweep().await.unwrap() }
    });
    let b = tokio::spawn({
        let relay = relays[1].clone();
        async move { relay.sweep().await.unwrap() }
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(a.claimed + b.claimed, 40);
    assert_eq!(a.succeeded + b.succeeded, 40);
    assert_eq!(a.claimed + a.skipped, a.fetched);
    assert_eq!(b.claimed + b.skipped, b.fetched);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 40);
    assert!(calls.values().all(|&count| count == 1), "{calls:?}");
}
