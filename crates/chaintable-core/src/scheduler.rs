//! Partitioned write scheduler — bounded-parallelism bulk writes.
//!
//! Two limits shape the pool: `ready` caps concurrent writes, `queued` is the
//! hard cap on admitted work. A submission past the hard cap blocks the
//! caller, propagating store latency back through the projection task to the
//! fetcher. Writes use replace semantics and are retried with exponential
//! backoff; an exhausted retry latches a failure that `wait_drain` surfaces
//! as a batch failure. Writes to the same partition are applied in submission
//! order; across partitions nothing is ordered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::IndexError;
use crate::store::{TableRow, TableStore};

// ─── Backoff ─────────────────────────────────────────────────────────────────

/// Exponential backoff schedule for failed bulk writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Retry ceiling; past it the write fails the batch.
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl Backoff {
    /// Delay before the `attempt`-th retry (1-based); `None` when exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_attempts {
            return None;
        }
        let base = self.initial.as_millis() as f64 * self.multiplier.powi(attempt as i32 - 1);
        let capped = base.min(self.max.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }
}

// ─── WriteScheduler ──────────────────────────────────────────────────────────

struct Shared {
    in_flight: AtomicUsize,
    failure: Mutex<Option<String>>,
    drained: Notify,
    partition_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Shared {
    fn record_failure(&self, message: String) {
        let mut failure = self.failure.lock().unwrap();
        // First failure wins; later ones repeat the same root cause.
        failure.get_or_insert(message);
    }

    fn finish_one(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.drained.notify_waiters();
    }

    fn partition_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.partition_locks
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_partition_lock(&self, key: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.partition_locks.lock().unwrap();
        // Two strong refs (map entry + ours) means no other writer holds it.
        if Arc::strong_count(lock) == 2 {
            locks.remove(key);
        }
    }
}

/// Bounded worker pool executing partition-grouped bulk writes.
pub struct WriteScheduler {
    store: Arc<dyn TableStore>,
    workers: Arc<Semaphore>,
    queue: Arc<Semaphore>,
    shared: Arc<Shared>,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl WriteScheduler {
    pub fn new(
        store: Arc<dyn TableStore>,
        ready: usize,
        queued: usize,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            workers: Arc::new(Semaphore::new(ready.max(1))),
            queue: Arc::new(Semaphore::new(queued.max(1))),
            shared: Arc::new(Shared {
                in_flight: AtomicUsize::new(0),
                failure: Mutex::new(None),
                drained: Notify::new(),
                partition_locks: Mutex::new(HashMap::new()),
            }),
            backoff,
            cancel,
        }
    }

    /// Number of admitted writes not yet completed.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Submit one partition group. Blocks when the hard queue cap is reached.
    /// Returns immediately once the write is admitted.
    pub async fn submit(
        &self,
        table: String,
        partition: String,
        rows: Vec<TableRow>,
    ) -> Result<(), IndexError> {
        if rows.is_empty() {
            return Ok(());
        }
        if let Some(message) = self.shared.failure.lock().unwrap().clone() {
            return Err(IndexError::BatchFailed(message));
        }
        if self.cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        let queue_permit = tokio::select! {
            permit = self.queue.clone().acquire_owned() => {
                permit.map_err(|_| IndexError::Cancelled)?
            }
            _ = self.cancel.cancelled() => return Err(IndexError::Cancelled),
        };

        // Taking the partition lock here (not in the worker) pins the
        // per-partition write order to submission order.
        let lock_key = format!("{table}/{partition}");
        let partition_lock = self.shared.partition_lock(&lock_key);
        let guard = tokio::select! {
            guard = partition_lock.clone().lock_owned() => guard,
            _ = self.cancel.cancelled() => return Err(IndexError::Cancelled),
        };

        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);

        let store = self.store.clone();
        let workers = self.workers.clone();
        let shared = self.shared.clone();
        let backoff = self.backoff.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let _queue_permit = queue_permit;
            let worker_permit = workers.acquire_owned().await;
            if worker_permit.is_err() {
                shared.record_failure("scheduler worker pool closed".into());
                drop(guard);
                shared.release_partition_lock(&lock_key, &partition_lock);
                shared.finish_one();
                return;
            }

            let mut attempt = 0u32;
            loop {
                match store.bulk_upsert(&table, &partition, rows.clone()).await {
                    Ok(()) => break,
                    Err(e) => {
                        attempt += 1;
                        match backoff.next_delay(attempt) {
                            Some(delay) if !cancel.is_cancelled() => {
                                tracing::warn!(
                                    %table,
                                    %partition,
                                    attempt,
                                    error = %e,
                                    "bulk write failed, retrying"
                                );
                                tokio::time::sleep(delay).await;
                            }
                            _ => {
                                tracing::error!(
                                    %table,
                                    %partition,
                                    attempt,
                                    error = %e,
                                    "bulk write exhausted retries"
                                );
                                shared.record_failure(e.to_string());
                                break;
                            }
                        }
                    }
                }
            }

            drop(guard);
            shared.release_partition_lock(&lock_key, &partition_lock);
            shared.finish_one();
        });

        Ok(())
    }

    /// Wait until every admitted write has completed, then surface any
    /// latched failure. The failure latch is cleared so the loop can retry
    /// the batch.
    pub async fn wait_drain(&self) -> Result<(), IndexError> {
        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            // Register before the check so a completion between the check
            // and the await cannot be missed.
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                break;
            }
            notified.await;
        }
        if let Some(message) = self.shared.failure.lock().unwrap().take() {
            return Err(IndexError::BatchFailed(message));
        }
        Ok(())
    }
}
