//! SLUICE Coalesce - Batched Invalidation Scheduling
//!
//! Turns resolved topic sets into executor calls. Two entry points:
//!
//! - [`CoalescingScheduler`]: unions bursts of writes into one flush per
//!   window, anchored to the first write of the burst.
//! - [`ImmediateInvalidator`]: resolves and evicts inside the calling task.
//!
//! Both share the [`flush`] driver, which evicts each topic exactly once
//! and attempts every topic even when some evictions fail.

pub mod flush;
pub mod immediate;
pub mod metrics;
pub mod scheduler;
pub mod telemetry;

pub use flush::{eviction_key, flush_topics, EvictionFailure, FlushReport};
pub use immediate::ImmediateInvalidator;
pub use metrics::{SchedulerMetrics, SchedulerSnapshot};
pub use scheduler::{BatchId, CoalescingScheduler, ScheduleOutcome};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
