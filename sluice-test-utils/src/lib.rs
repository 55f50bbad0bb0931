//! SLUICE Test Utilities
//!
//! Centralized test infrastructure for the SLUICE workspace:
//! - Recording executor standing in for a cache host
//! - Proptest generators for topics, payloads and write bursts
//! - Test fixtures for the built-in catalog and common payloads
//! - Custom assertions for SLUICE-specific validation

// Re-export core types for convenience
pub use sluice_core::{
    catalog, CacheKey, CoalesceConfig, ConfigError, ExecutorError, InvalidationExecutor,
    InvalidationRule, Payload, Predicate, Resolution, RuleResolver, RuleTable, SchedulerError,
    SluiceError, SluiceResult, TopicKey, TopicName, TopicRegistry,
};

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// RECORDING EXECUTOR
// ============================================================================

/// One `evict` call observed by a [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEviction {
    pub key: TopicKey,
    /// When the call started, on the tokio clock (paused clocks included).
    pub at: Instant,
}

/// Executor that records every eviction and can inject failures or latency.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    evictions: Mutex<Vec<RecordedEviction>>,
    failing: HashSet<TopicKey>,
    fail_all: bool,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// An executor whose every eviction fails.
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    /// Fail evictions of `key` (after recording them).
    pub fn failing_on(mut self, key: TopicKey) -> Self {
        self.failing.insert(key);
        self
    }

    /// Sleep for `delay` inside every eviction.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn log(&self) -> MutexGuard<'_, Vec<RecordedEviction>> {
        self.evictions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every eviction seen so far, in call order.
    pub fn evictions(&self) -> Vec<RecordedEviction> {
        self.log().clone()
    }

    /// Keys evicted so far, in call order.
    pub fn keys(&self) -> Vec<TopicKey> {
        self.log().iter().map(|e| e.key.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.log().len()
    }

    /// Distinct instants at which evictions started, ascending.
    ///
    /// With a paused clock and no injected delay every flush happens at a
    /// single instant, so this is the list of flush times.
    pub fn flush_instants(&self) -> Vec<Instant> {
        let mut instants: Vec<Instant> = self.log().iter().map(|e| e.at).collect();
        instants.sort();
        instants.dedup();
        instants
    }

    /// Highest number of evictions observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.log().clear();
    }
}

#[async_trait]
impl InvalidationExecutor for RecordingExecutor {
    async fn evict(&self, key: &TopicKey) -> SluiceResult<()> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.log().push(RecordedEviction {
            key: key.clone(),
            at: Instant::now(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_all || self.failing.contains(key) {
            return Err(ExecutorError::EvictionFailed {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating SLUICE inputs.

    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    /// Contract statuses, including ones no catalog rule reacts to.
    pub const CONTRACT_STATUSES: &[&str] =
        &["active", "expired", "terminated", "renewed", "draft", "pending"];

    /// Generate any topic declared in the built-in catalog.
    pub fn arb_catalog_topic() -> impl Strategy<Value = TopicName> {
        let names: Vec<TopicName> = fixtures::catalog_registry().names().cloned().collect();
        proptest::sample::select(names)
    }

    /// Generate a topic that may or may not be declared anywhere.
    pub fn arb_topic() -> impl Strategy<Value = TopicName> {
        prop_oneof![
            4 => arb_catalog_topic(),
            1 => "[A-Z]{3,8}".prop_map(TopicName::from),
        ]
    }

    /// Generate a contract write payload.
    pub fn arb_contract_payload() -> impl Strategy<Value = Payload> {
        (proptest::sample::select(CONTRACT_STATUSES), 1i64..10_000)
            .prop_map(|(status, id)| json!({"contract_id": id, "status": status}))
    }

    /// Generate an optional payload of assorted shapes.
    pub fn arb_payload() -> impl Strategy<Value = Option<Payload>> {
        prop_oneof![
            Just(None),
            arb_contract_payload().prop_map(Some),
            any::<bool>().prop_map(|billable| Some(json!({"billable": billable}))),
            Just(Some(json!({"status": 42}))),
            Just(Some(json!(null))),
        ]
    }

    /// Generate a burst of writes: (delay since previous write in ms, topic).
    pub fn arb_burst(max_gap_ms: u64) -> impl Strategy<Value = Vec<(u64, TopicName)>> {
        proptest::collection::vec((0..=max_gap_ms, arb_catalog_topic()), 1..12)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    /// The built-in catalog registry.
    pub fn catalog_registry() -> TopicRegistry {
        catalog::registry().expect("built-in catalog registry is valid")
    }

    /// A resolver over the built-in catalog rules.
    pub fn catalog_resolver() -> RuleResolver {
        RuleResolver::new(catalog::rules())
    }

    /// Registry and resolver over the built-in catalog, ready for a scheduler.
    pub fn catalog_parts() -> (RuleResolver, Arc<TopicRegistry>) {
        let (registry, rules) = catalog::validated().expect("built-in catalog validates");
        (RuleResolver::new(rules), Arc::new(registry))
    }

    /// Coalescing config with the given window in milliseconds.
    pub fn window_ms(window: u64) -> CoalesceConfig {
        CoalesceConfig::new().with_window(Duration::from_millis(window))
    }

    pub fn active_contract() -> Payload {
        json!({"contract_id": 41, "status": "active"})
    }

    pub fn draft_contract() -> Payload {
        json!({"contract_id": 42, "status": "draft"})
    }

    pub fn beneficiary(id: i64) -> Payload {
        json!({"beneficiary_id": id, "name": "test-beneficiary"})
    }

    /// Exact key of a static catalog topic.
    pub fn exact(parts: &[&str]) -> TopicKey {
        TopicKey::Exact(CacheKey::new(parts.iter().map(|p| (*p).into()).collect()))
    }

    /// Family key of a parameterized catalog topic.
    pub fn family(parts: &[&str]) -> TopicKey {
        TopicKey::Family(CacheKey::new(parts.iter().map(|p| (*p).into()).collect()))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for SLUICE-specific validation.

    use super::*;

    /// Assert that a resolution contains exactly `expected`, in order.
    #[track_caller]
    pub fn assert_topics(resolution: &Resolution, expected: &[&str]) {
        let actual: Vec<&str> = resolution.iter().map(|t| t.as_str()).collect();
        assert_eq!(actual, expected, "Unexpected resolved topics");
    }

    /// Assert that a SluiceResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &SluiceResult<T>) {
        match result {
            Err(SluiceError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a SluiceResult is the given scheduler error.
    #[track_caller]
    pub fn assert_scheduler_error<T: std::fmt::Debug>(
        result: &SluiceResult<T>,
        expected: SchedulerError,
    ) {
        match result {
            Err(SluiceError::Scheduler(err)) => assert_eq!(*err, expected),
            other => panic!("Expected Scheduler error {:?}, got: {:?}", expected, other),
        }
    }

    /// Assert that a SluiceResult is a FlushFailed error naming `failed`.
    #[track_caller]
    pub fn assert_flush_failed<T: std::fmt::Debug>(result: &SluiceResult<T>, failed: &[&str]) {
        match result {
            Err(SluiceError::Executor(ExecutorError::FlushFailed { failed: got, .. })) => {
                let got: Vec<&str> = got.iter().map(String::as_str).collect();
                assert_eq!(got, failed, "Wrong failed topics");
            }
            other => panic!("Expected FlushFailed error, got: {:?}", other),
        }
    }
}
