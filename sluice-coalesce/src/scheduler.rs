//! Coalescing invalidation scheduler.
//!
//! Bursts of writes produce one flush per window instead of one per write.
//! Each scheduler instance is a two-state machine:
//!
//! - `Idle`: no pending batch.
//! - `Accumulating`: a batch is open and its timer is running.
//!
//! The first schedule call in `Idle` opens a batch and starts a timer of
//! the configured window. Later calls union their resolved topics into the
//! open batch and never touch the timer, so the window is anchored to the
//! first call of the burst. When the timer fires the batch is taken out of
//! the state in one critical section and flushed; calls arriving during the
//! flush open a fresh batch.
//!
//! # Example
//!
//! ```ignore
//! let scheduler = CoalescingScheduler::new(resolver, registry, executor, config)?;
//!
//! // Fire-and-forget from the write path
//! scheduler.schedule_invalidation("BENEFICIARIES", Some(&payload))?;
//!
//! // On shutdown, drop whatever is still pending
//! scheduler.shutdown()?;
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use sluice_core::{
    CoalesceConfig, ConfigError, InvalidationExecutor, Payload, RuleResolver, SchedulerError,
    SluiceResult, TopicName, TopicRegistry,
};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::flush::{flush_topics, FlushReport};
use crate::metrics::{SchedulerMetrics, SchedulerSnapshot};

/// Identifier of one pending batch, unique per scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(u64);

impl BatchId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// What a schedule call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The call opened a new batch and started its timer.
    Opened(BatchId),
    /// The call was merged into the batch that was already open.
    Coalesced(BatchId),
}

impl ScheduleOutcome {
    pub fn batch(&self) -> BatchId {
        match self {
            Self::Opened(id) | Self::Coalesced(id) => *id,
        }
    }
}

/// Topics accumulated for one window plus the timer that will flush them.
struct PendingBatch {
    id: BatchId,
    topics: IndexSet<TopicName>,
    opened_at: Instant,
    timer: JoinHandle<()>,
}

enum BatchState {
    Idle,
    Accumulating(PendingBatch),
}

struct SchedulerState {
    batch: BatchState,
    next_batch: u64,
    shut_down: bool,
}

impl SchedulerState {
    fn take(&mut self, expected: Option<BatchId>) -> Option<PendingBatch> {
        match &self.batch {
            BatchState::Accumulating(batch) if expected.map_or(true, |id| id == batch.id) => {}
            _ => return None,
        }
        match std::mem::replace(&mut self.batch, BatchState::Idle) {
            BatchState::Accumulating(batch) => Some(batch),
            BatchState::Idle => None,
        }
    }
}

struct Shared<E> {
    resolver: RuleResolver,
    registry: Arc<TopicRegistry>,
    executor: Arc<E>,
    config: CoalesceConfig,
    state: Mutex<SchedulerState>,
    metrics: SchedulerMetrics,
}

impl<E> Shared<E>
where
    E: InvalidationExecutor + 'static,
{
    fn lock(&self) -> Result<MutexGuard<'_, SchedulerState>, SchedulerError> {
        self.state.lock().map_err(|_| SchedulerError::LockPoisoned)
    }

    /// Timer callback: flush batch `id` if it is still the pending one.
    ///
    /// The batch may already be gone if it was cancelled or flushed
    /// explicitly while the timer was waking up.
    async fn fire(self: Arc<Self>, id: BatchId) {
        let batch = match self.lock() {
            Ok(mut state) => state.take(Some(id)),
            Err(err) => {
                tracing::error!(batch = %id, error = %err, "Cannot take pending batch");
                return;
            }
        };

        let Some(batch) = batch else {
            tracing::trace!(batch = %id, "Timer fired for a batch that is no longer pending");
            return;
        };

        // Failures are logged and counted inside; a timer-driven flush has
        // no caller to propagate to.
        let _ = self.flush(batch).await;
    }

    async fn flush(&self, batch: PendingBatch) -> SluiceResult<FlushReport> {
        let PendingBatch {
            id,
            topics,
            opened_at,
            ..
        } = batch;

        tracing::debug!(
            batch = %id,
            topics = topics.len(),
            waited_ms = opened_at.elapsed().as_millis() as u64,
            "Flushing invalidation batch"
        );

        let report = flush_topics(
            &self.registry,
            self.executor.as_ref(),
            topics,
            self.config.eviction_concurrency,
        )
        .await;

        SchedulerMetrics::add(&self.metrics.topics_evicted, report.evicted.len() as u64);
        if report.is_success() {
            SchedulerMetrics::incr(&self.metrics.flushes_completed);
        } else {
            SchedulerMetrics::incr(&self.metrics.flushes_failed);
            tracing::error!(
                batch = %id,
                failed = report.failures.len(),
                attempted = report.attempted(),
                "Invalidation flush failed; batch is not retried"
            );
        }

        report.into_result()
    }
}

/// Batches invalidation requests per fixed window and flushes each batch once.
///
/// Instances share no state with each other. The scheduler must be used
/// from within a tokio runtime: the window timer is a spawned task owned by
/// the pending batch. Dropping the scheduler aborts that timer and discards
/// the pending batch; flushes already in flight run to completion.
pub struct CoalescingScheduler<E>
where
    E: InvalidationExecutor + 'static,
{
    shared: Arc<Shared<E>>,
}

impl<E> CoalescingScheduler<E>
where
    E: InvalidationExecutor + 'static,
{
    /// Create a scheduler in the `Idle` state.
    ///
    /// Fails if `config` does not pass [`CoalesceConfig::validate`].
    pub fn new(
        resolver: RuleResolver,
        registry: Arc<TopicRegistry>,
        executor: Arc<E>,
        config: CoalesceConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                resolver,
                registry,
                executor,
                config,
                state: Mutex::new(SchedulerState {
                    batch: BatchState::Idle,
                    next_batch: 1,
                    shut_down: false,
                }),
                metrics: SchedulerMetrics::new(),
            }),
        })
    }

    /// Get the scheduler configuration.
    pub fn config(&self) -> &CoalesceConfig {
        &self.shared.config
    }

    /// Get a reference to the executor.
    pub fn executor(&self) -> &E {
        &self.shared.executor
    }

    /// Snapshot of this instance's counters.
    pub fn metrics(&self) -> SchedulerSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Resolve `trigger` and add the result to the pending batch.
    ///
    /// Returns as soon as the topics are recorded; eviction happens when
    /// the batch's window elapses. Opens a batch and starts its timer if the
    /// scheduler is idle. Fails when called outside a tokio runtime, when the
    /// window deadline overflows the clock, after
    /// [`shutdown`](Self::shutdown), or if the state lock is poisoned.
    pub fn schedule_invalidation(
        &self,
        trigger: impl Into<TopicName>,
        payload: Option<&Payload>,
    ) -> SluiceResult<ScheduleOutcome> {
        let resolution = self.shared.resolver.affected_topics(trigger, payload);
        let trigger = resolution.trigger().cloned();

        // Computed before locking so an unrepresentable deadline cannot
        // poison the state.
        let window = self.shared.config.window;
        let opened_at = Instant::now();
        let deadline = opened_at
            .checked_add(window)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "window".to_string(),
                value: format!("{}ms", window.as_millis()),
                reason: "deadline overflows the clock".to_string(),
            })?;

        let mut guard = self.shared.lock()?;
        let state = &mut *guard;
        if state.shut_down {
            return Err(SchedulerError::ShutDown.into());
        }

        if let BatchState::Accumulating(batch) = &mut state.batch {
            batch.topics.extend(resolution);
            SchedulerMetrics::incr(&self.shared.metrics.requests_coalesced);
            tracing::trace!(
                batch = %batch.id,
                trigger = ?trigger,
                pending = batch.topics.len(),
                "Coalesced invalidation request"
            );
            return Ok(ScheduleOutcome::Coalesced(batch.id));
        }

        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        let id = BatchId(state.next_batch);
        state.next_batch += 1;

        let shared = Arc::clone(&self.shared);
        let timer = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            shared.fire(id).await;
        });

        let topics: IndexSet<TopicName> = resolution.into_iter().collect();
        tracing::debug!(
            batch = %id,
            trigger = ?trigger,
            topics = topics.len(),
            window_ms = window.as_millis() as u64,
            "Opened invalidation batch"
        );
        state.batch = BatchState::Accumulating(PendingBatch {
            id,
            topics,
            opened_at,
            timer,
        });
        SchedulerMetrics::incr(&self.shared.metrics.batches_opened);

        Ok(ScheduleOutcome::Opened(id))
    }

    /// Flush the pending batch now instead of waiting for its timer.
    ///
    /// Returns `Ok(None)` when idle. Unlike timer-driven flushes, eviction
    /// failures are returned to the caller.
    pub async fn flush_now(&self) -> SluiceResult<Option<FlushReport>> {
        let batch = self.shared.lock()?.take(None);
        match batch {
            Some(batch) => {
                batch.timer.abort();
                self.shared.flush(batch).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Discard the pending batch without evicting anything.
    ///
    /// Returns the discarded topics. A flush that already took its batch is
    /// unaffected. Intended for shutdown and cleanup, not request handling.
    pub fn cancel_pending(&self) -> SluiceResult<Vec<TopicName>> {
        let batch = self.shared.lock()?.take(None);
        Ok(self.discard(batch))
    }

    /// Cancel pending work and refuse any further scheduling.
    pub fn shutdown(&self) -> SluiceResult<Vec<TopicName>> {
        let batch = {
            let mut state = self.shared.lock()?;
            state.shut_down = true;
            state.take(None)
        };
        tracing::info!("Coalescing scheduler shut down");
        Ok(self.discard(batch))
    }

    fn discard(&self, batch: Option<PendingBatch>) -> Vec<TopicName> {
        let Some(batch) = batch else {
            return Vec::new();
        };
        batch.timer.abort();
        SchedulerMetrics::incr(&self.shared.metrics.batches_cancelled);
        tracing::debug!(
            batch = %batch.id,
            topics = batch.topics.len(),
            "Discarded pending invalidation batch"
        );
        batch.topics.into_iter().collect()
    }

    /// True if no batch is pending.
    pub fn is_idle(&self) -> SluiceResult<bool> {
        Ok(matches!(self.shared.lock()?.batch, BatchState::Idle))
    }

    /// The pending batch id, if any.
    pub fn pending_batch(&self) -> SluiceResult<Option<BatchId>> {
        Ok(match &self.shared.lock()?.batch {
            BatchState::Accumulating(batch) => Some(batch.id),
            BatchState::Idle => None,
        })
    }

    /// Topics accumulated in the pending batch, in first-seen order.
    pub fn pending_topics(&self) -> SluiceResult<Vec<TopicName>> {
        Ok(match &self.shared.lock()?.batch {
            BatchState::Accumulating(batch) => batch.topics.iter().cloned().collect(),
            BatchState::Idle => Vec::new(),
        })
    }
}

impl<E> Drop for CoalescingScheduler<E>
where
    E: InvalidationExecutor + 'static,
{
    fn drop(&mut self) {
        let mut state = match self.shared.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.shut_down = true;
        if let Some(batch) = state.take(None) {
            batch.timer.abort();
        }
    }
}

impl<E> fmt::Debug for CoalescingScheduler<E>
where
    E: InvalidationExecutor + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingScheduler")
            .field("config", &self.shared.config)
            .field("metrics", &self.shared.metrics.snapshot())
            .finish_non_exhaustive()
    }
}
