//! SLUICE Cache - Reference Query Cache Host
//!
//! An in-memory cache of query results that implements
//! [`InvalidationExecutor`](sluice_core::InvalidationExecutor), so a
//! coordinator can be wired end to end without an external cache.
//!
//! # Example
//!
//! ```ignore
//! let cache = Arc::new(InMemoryQueryCache::with_mode(EvictionMode::MarkStale));
//! let scheduler = CoalescingScheduler::new(resolver, registry, Arc::clone(&cache), config)?;
//!
//! let rows = cache.get_or_fetch(&key, || load_beneficiaries()).await?;
//! ```

pub mod entry;
pub mod query_cache;

pub use entry::CachedQuery;
pub use query_cache::{CacheStats, EvictionMode, InMemoryQueryCache};
