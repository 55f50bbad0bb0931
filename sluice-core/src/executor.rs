//! Contract between the coordinator and the reactive cache host.

use async_trait::async_trait;

use crate::error::SluiceResult;
use crate::topic::TopicKey;

/// Cache host adapter that evicts cached query results.
///
/// The coordinator calls [`evict`](Self::evict) once per resolved topic at
/// flush time and never reads or writes cache entries itself. Calls for
/// different topics of one flush may run concurrently; implementations must
/// be safe to share across tasks.
///
/// # Key Format
///
/// `TopicKey::Exact` names a single cached key. `TopicKey::Family` names a
/// prefix: every cached key starting with it belongs to the topic and must
/// be evicted or marked stale.
#[async_trait]
pub trait InvalidationExecutor: Send + Sync {
    /// Evict (or mark stale) every cached entry covered by `key`.
    async fn evict(&self, key: &TopicKey) -> SluiceResult<()>;
}

#[async_trait]
impl<E> InvalidationExecutor for std::sync::Arc<E>
where
    E: InvalidationExecutor + ?Sized,
{
    async fn evict(&self, key: &TopicKey) -> SluiceResult<()> {
        (**self).evict(key).await
    }
}

/// Executor that discards every eviction.
///
/// Useful for wiring a coordinator before a cache host exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpExecutor;

#[async_trait]
impl InvalidationExecutor for NoOpExecutor {
    async fn evict(&self, _key: &TopicKey) -> SluiceResult<()> {
        Ok(())
    }
}
