//! Flush driver: turns a final topic set into executor calls.
//!
//! One `evict` is issued per topic. Evictions run concurrently up to the
//! configured limit, and every topic is attempted even when some fail.

use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use indexmap::IndexSet;
use sluice_core::{
    CacheKey, ExecutorError, InvalidationExecutor, SluiceError, SluiceResult, TopicKey,
    TopicName, TopicRegistry,
};

/// One topic whose eviction failed during a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionFailure {
    pub topic: TopicName,
    pub key: TopicKey,
    pub error: SluiceError,
}

/// Outcome of one flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Topics evicted successfully, in flush order.
    pub evicted: Vec<TopicName>,
    /// Topics whose eviction failed, in flush order.
    pub failures: Vec<EvictionFailure>,
    /// Wall time spent waiting on the executor.
    pub elapsed: Duration,
}

impl FlushReport {
    /// Number of `evict` calls issued.
    pub fn attempted(&self) -> usize {
        self.evicted.len() + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Convert a report with failures into `ExecutorError::FlushFailed`.
    pub fn into_result(self) -> SluiceResult<FlushReport> {
        if self.is_success() {
            return Ok(self);
        }
        Err(ExecutorError::FlushFailed {
            failed: self.failures.iter().map(|f| f.topic.to_string()).collect(),
            attempted: self.attempted(),
        }
        .into())
    }
}

/// Map a topic to its eviction descriptor.
///
/// Topics missing from the registry can only reach a flush as unknown
/// triggers. They are evicted as the family keyed by their own name rather
/// than dropped.
pub fn eviction_key(registry: &TopicRegistry, topic: &TopicName) -> TopicKey {
    match registry.topic_key(topic.as_str()) {
        Ok(key) => key,
        Err(_) => {
            tracing::warn!(
                topic = %topic,
                "Flushing topic missing from registry; evicting by name"
            );
            TopicKey::Family(CacheKey::from([topic.as_str()]))
        }
    }
}

/// Evict every topic in `topics` through `executor`.
///
/// Duplicate names are evicted once. At most `concurrency` evictions are in
/// flight at a time (a value of zero is treated as one).
pub async fn flush_topics<E, I>(
    registry: &TopicRegistry,
    executor: &E,
    topics: I,
    concurrency: usize,
) -> FlushReport
where
    E: InvalidationExecutor + ?Sized,
    I: IntoIterator<Item = TopicName>,
{
    let started = Instant::now();
    let targets: IndexSet<TopicName> = topics.into_iter().collect();
    let targets: Vec<(TopicName, TopicKey)> = targets
        .into_iter()
        .map(|topic| {
            let key = eviction_key(registry, &topic);
            (topic, key)
        })
        .collect();

    let outcomes: Vec<(TopicName, TopicKey, SluiceResult<()>)> = stream::iter(targets)
        .map(|(topic, key)| async move {
            let outcome = executor.evict(&key).await;
            (topic, key, outcome)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut report = FlushReport {
        evicted: Vec::with_capacity(outcomes.len()),
        failures: Vec::new(),
        elapsed: Duration::ZERO,
    };

    for (topic, key, outcome) in outcomes {
        match outcome {
            Ok(()) => report.evicted.push(topic),
            Err(error) => {
                tracing::error!(topic = %topic, key = %key, error = %error, "Eviction failed");
                report.failures.push(EvictionFailure { topic, key, error });
            }
        }
    }

    report.elapsed = started.elapsed();
    tracing::debug!(
        evicted = report.evicted.len(),
        failed = report.failures.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Flush finished"
    );
    report
}
