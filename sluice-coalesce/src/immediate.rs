//! Non-coalesced invalidation path: resolve and evict right away.

use std::sync::Arc;

use sluice_core::{
    CoalesceConfig, ConfigError, InvalidationExecutor, Payload, RuleResolver, SluiceResult, TopicName,
    TopicRegistry,
};

use crate::flush::{flush_topics, FlushReport};

/// Resolves a written topic and flushes the result in the same call.
///
/// Use this where a caller must observe the eviction before continuing,
/// e.g. read-your-writes screens. Bursty write paths should go through the
/// [`CoalescingScheduler`](crate::CoalescingScheduler) instead.
pub struct ImmediateInvalidator<E>
where
    E: InvalidationExecutor,
{
    resolver: RuleResolver,
    registry: Arc<TopicRegistry>,
    executor: Arc<E>,
    eviction_concurrency: usize,
}

impl<E> ImmediateInvalidator<E>
where
    E: InvalidationExecutor,
{
    /// Fails if `config` does not pass [`CoalesceConfig::validate`].
    pub fn new(
        resolver: RuleResolver,
        registry: Arc<TopicRegistry>,
        executor: Arc<E>,
        config: &CoalesceConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            resolver,
            registry,
            executor,
            eviction_concurrency: config.eviction_concurrency,
        })
    }

    /// Get a reference to the executor.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Resolve `trigger` and evict every affected topic now.
    ///
    /// Returns `ExecutorError::FlushFailed` if any eviction failed; all
    /// evictions are attempted regardless.
    pub async fn invalidate(
        &self,
        trigger: impl Into<TopicName>,
        payload: Option<&Payload>,
    ) -> SluiceResult<FlushReport> {
        let resolution = self.resolver.affected_topics(trigger, payload);
        tracing::debug!(
            trigger = ?resolution.trigger(),
            topics = resolution.len(),
            "Immediate invalidation"
        );
        flush_topics(
            &self.registry,
            self.executor.as_ref(),
            resolution,
            self.eviction_concurrency,
        )
        .await
        .into_result()
    }
}

impl<E> Clone for ImmediateInvalidator<E>
where
    E: InvalidationExecutor,
{
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            registry: Arc::clone(&self.registry),
            executor: Arc::clone(&self.executor),
            eviction_concurrency: self.eviction_concurrency,
        }
    }
}
