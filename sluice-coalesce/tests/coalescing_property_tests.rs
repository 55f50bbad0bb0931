//! Property-Based Tests for Coalesced Flushing
//!
//! **Property: One flush per burst**
//!
//! For any burst of writes whose span is shorter than the window, the
//! scheduler SHALL issue exactly one flush, exactly one window after the
//! first write, evicting the union of every write's resolved topics with
//! each topic evicted once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use sluice_coalesce::CoalescingScheduler;
use sluice_test_utils::{fixtures, generators, RecordingExecutor, TopicKey, TopicName};
use tokio::time::Instant;

const WINDOW_MS: u64 = 300;

/// Largest gap between writes; a full burst stays well inside the window.
const MAX_GAP_MS: u64 = 20;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("failed to build test runtime")
}

/// Run `burst` through a fresh scheduler and return (flush offsets, keys).
fn run_burst(burst: &[(u64, TopicName)]) -> (Vec<Duration>, Vec<TopicKey>) {
    paused_runtime().block_on(async {
        let (resolver, registry) = fixtures::catalog_parts();
        let executor = Arc::new(RecordingExecutor::new());
        let scheduler = CoalescingScheduler::new(
            resolver,
            registry,
            Arc::clone(&executor),
            fixtures::window_ms(WINDOW_MS),
        )
        .expect("valid scheduler config");

        let mut first_call = None;
        for (gap, topic) in burst {
            tokio::time::sleep(Duration::from_millis(*gap)).await;
            first_call.get_or_insert_with(Instant::now);
            scheduler
                .schedule_invalidation(topic.clone(), None)
                .expect("schedule inside runtime");
        }

        tokio::time::sleep(Duration::from_millis(WINDOW_MS * 2)).await;
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }

        let start = first_call.expect("burst is never empty");
        let offsets = executor
            .flush_instants()
            .into_iter()
            .map(|at| at - start)
            .collect();
        (offsets, executor.keys())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_burst_flushes_once_after_window(burst in generators::arb_burst(MAX_GAP_MS)) {
        let (offsets, _) = run_burst(&burst);
        prop_assert_eq!(offsets, vec![Duration::from_millis(WINDOW_MS)]);
    }

    #[test]
    fn prop_burst_evicts_union_once(burst in generators::arb_burst(MAX_GAP_MS)) {
        let (_, keys) = run_burst(&burst);

        let resolver = fixtures::catalog_resolver();
        let registry = fixtures::catalog_registry();
        let mut expected_topics: Vec<TopicName> = Vec::new();
        for (_, topic) in &burst {
            for affected in resolver.affected_topics(topic.clone(), None) {
                if !expected_topics.contains(&affected) {
                    expected_topics.push(affected);
                }
            }
        }
        let expected: Vec<TopicKey> = expected_topics
            .iter()
            .map(|topic| registry.topic_key(topic.as_str()).expect("catalog topic"))
            .collect();

        let distinct: HashSet<&TopicKey> = keys.iter().collect();
        prop_assert_eq!(distinct.len(), keys.len(), "a topic was evicted twice");
        prop_assert_eq!(distinct, expected.iter().collect::<HashSet<_>>());
    }
}
