//! Relay engine: sweep the outbox, claim records, invoke, record outcomes.
//!
//! One sweep fetches a bounded batch of claimable records (oldest first),
//! claims each one, and runs decode → resolve → invoke for the records it
//! won. Every record is resolved on its own: a failing invocation becomes a
//! `FAIL` row and the sweep moves on. Only storage errors escape a sweep.
//!
//! Scheduling is the caller's business. [`Relay::run`] is a convenience poll
//! loop; any number of relays, in any number of processes, may sweep the
//! same table concurrently.

use crate::claim::{Claim, ClaimManager};
use crate::error::{Error, Result};
use crate::model::{LockId, OutboxRecord, Resolution, Status};
use crate::registry::InvocationRegistry;
use crate::store::OutboxStore;
use crate::telemetry::metrics;
use crate::telemetry::relay::{record_state_transition, start_relay_span};
use chrono::Utc;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{Instrument, debug, error, info, warn};

/// Configuration for the relay engine.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum records fetched per sweep.
    pub batch_size: i64,
    /// A lock older than this is presumed abandoned and may be re-claimed.
    pub stale_after: Duration,
    /// Delay between sweeps in [`Relay::run`].
    pub poll_interval: Duration,
    /// Upper bound on one invocation. None = wait indefinitely.
    pub invocation_timeout: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            stale_after: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            invocation_timeout: None,
        }
    }
}

impl RelayConfig {
    /// Reject settings under which two workers could hold one record.
    ///
    /// A live worker only keeps its claim for `stale_after`, so an invocation
    /// must be cut off before then.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size <= 0 {
            return Err(Error::Config(format!(
                "batch size must be positive, got {}",
                self.batch_size
            )));
        }
        if self.stale_after.is_zero() {
            return Err(Error::Config(
                "stale lock threshold must be greater than zero".to_string(),
            ));
        }
        match self.invocation_timeout {
            Some(limit) if limit.is_zero() => Err(Error::Config(
                "invocation timeout must be greater than zero".to_string(),
            )),
            Some(limit) if limit >= self.stale_after => Err(Error::Config(format!(
                "invocation timeout ({}ms) must be shorter than the stale lock threshold ({}ms)",
                limit.as_millis(),
                self.stale_after.as_millis()
            ))),
            _ => Ok(()),
        }
    }
}

/// Counts for one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Candidates returned by the store.
    pub fetched: usize,
    /// Candidates this worker claimed.
    pub claimed: usize,
    /// Candidates another worker claimed first.
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Claimed records whose lock was reaped before the outcome was written.
    pub lost: usize,
}

/// Stop signal shared by a relay and its clones.
#[derive(Default)]
struct Shutdown {
    requested: AtomicBool,
    notify: Notify,
}

enum Finished {
    Resolved(Status),
    Lost,
}

/// The relay: claims outbox records and executes their invocations.
pub struct Relay<S> {
    store: Arc<S>,
    claims: ClaimManager<S>,
    registry: Arc<InvocationRegistry>,
    config: RelayConfig,
    shutdown: Arc<Shutdown>,
}

impl<S> Clone for Relay<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            claims: self.claims.clone(),
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<S: OutboxStore + 'static> Relay<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<InvocationRegistry>,
        lock_id: LockId,
        config: RelayConfig,
    ) -> Self {
        if config.invocation_timeout.is_none() {
            warn!(
                stale_after_ms = config.stale_after.as_millis() as u64,
                "no invocation timeout: a handler running past the stale threshold may be re-claimed and run twice"
            );
        }
        let claims = ClaimManager::new(Arc::clone(&store), lock_id, config.stale_after);
        Self {
            store,
            claims,
            registry,
            config,
            shutdown: Arc::default(),
        }
    }

    /// This worker's lock token.
    pub fn lock_id(&self) -> &LockId {
        self.claims.lock_id()
    }

    /// Signal every [`Relay::run`] loop sharing this relay to stop after its
    /// current sweep.
    pub fn shutdown(&self) {
        self.shutdown.requested.store(true, Ordering::Release);
        self.shutdown.notify.notify_waiters();
    }

    /// Sweep every `poll_interval` until shutdown.
    pub async fn run(&self) -> Result<()> {
        info!(lock_id = %self.lock_id(), "relay started");

        loop {
            match self.sweep().await {
                Ok(report) if report.fetched > 0 => info!(
                    fetched = report.fetched,
                    claimed = report.claimed,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    "sweep finished"
                ),
                Ok(_) => {}
                Err(e) => error!("sweep error: {e}"),
            }

            // Register before checking the flag so a concurrent shutdown is
            // not missed.
            let notified = self.shutdown.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shutdown.requested.load(Ordering::Acquire) {
                info!("relay shutting down");
                return Ok(());
            }

            tokio::select! {
                _ = &mut notified => {
                    info!("relay shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Run one sweep over a batch of candidates.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let now = Utc::now();
        let candidates = self
            .store
            .fetch_candidates(self.config.batch_size, self.claims.stale_before(now))
            .await?;

        for candidate in candidates {
            report.fetched += 1;
            let previous = candidate.status;

            let record = match self.claims.try_claim(&candidate, Utc::now()).await? {
                Claim::Acquired(record) => record,
                Claim::Lost => {
                    report.skipped += 1;
                    continue;
                }
            };
            report.claimed += 1;

            match self.process(&record, previous).await? {
                Finished::Resolved(Status::Success) => report.succeeded += 1,
                Finished::Resolved(_) => report.failed += 1,
                Finished::Lost => report.lost += 1,
            }
        }

        Ok(report)
    }

    /// Execute a claimed record and write its terminal status.
    async fn process(&self, record: &OutboxRecord, previous: Status) -> Result<Finished> {
        let span = start_relay_span(&record.target_type, &record.method_name, &record.id.0);
        record_state_transition(&span, &previous.to_string(), "locked");
        metrics::record_transitions().add(
            1,
            &[
                KeyValue::new("from", previous.to_string()),
                KeyValue::new("to", "locked"),
            ],
        );

        async {
            let started = Instant::now();
            let resolution = match self.execute(record).await {
                Ok(()) => Resolution::Success,
                Err(e) if e.is_record_level() => Resolution::Fail(e.to_string()),
                Err(e) => return Err(e),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            metrics::invocation_duration_ms().record(
                duration_ms as f64,
                &[KeyValue::new("target", record.target_type.clone())],
            );

            let affected = self
                .store
                .finish(record.id, self.lock_id(), &resolution, Utc::now())
                .await?;
            if affected == 0 {
                warn!(id = %record.id, "lock lost before outcome was written");
                return Ok(Finished::Lost);
            }

            let status = resolution.status();
            record_state_transition(&span, "locked", &status.to_string());
            metrics::record_transitions().add(
                1,
                &[
                    KeyValue::new("from", "locked"),
                    KeyValue::new("to", status.to_string()),
                ],
            );

            match &resolution {
                Resolution::Success => info!(id = %record.id, duration_ms, "invocation succeeded"),
                Resolution::Fail(message) => {
                    error!(id = %record.id, duration_ms, error = %message, "invocation failed")
                }
            }
            Ok(Finished::Resolved(status))
        }
        .instrument(span.clone())
        .await
    }

    /// Decode, resolve and invoke. Every error returned here is record-level.
    async fn execute(&self, record: &OutboxRecord) -> Result<()> {
        let key = record.describe_method(self.registry.as_ref())?;
        let method = self.registry.resolve(&key)?;
        let args = record.materialize_arguments(method.param_types())?;
        debug!(method = %key, "invoking");

        // Run on its own task so a panicking handler only fails its record.
        let handle = tokio::spawn(method.invoke(args));
        let abort = handle.abort_handle();

        let joined = match self.config.invocation_timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Err(Error::Invocation(format!(
                        "invocation timed out after {}ms",
                        limit.as_millis()
                    )));
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(Error::Invocation(panic_message(e.into_panic()))),
            Err(e) => Err(Error::Invocation(format!("invocation aborted: {e}"))),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("invocation panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("invocation panicked: {s}")
    } else {
        "invocation panicked".to_string()
    }
}
