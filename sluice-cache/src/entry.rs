//! Cached query results with staleness metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One cached query result.
///
/// An entry marked stale still carries its last value so screens can keep
/// showing it while a refetch is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedQuery {
    value: serde_json::Value,
    cached_at: DateTime<Utc>,
    stale: bool,
}

impl CachedQuery {
    /// Create a fresh entry cached now.
    pub fn new(value: serde_json::Value) -> Self {
        Self::cached_at(value, Utc::now())
    }

    pub fn cached_at(value: serde_json::Value, cached_at: DateTime<Utc>) -> Self {
        Self {
            value,
            cached_at,
            stale: false,
        }
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn into_value(self) -> serde_json::Value {
        self.value
    }

    /// When the value was stored.
    pub fn stored_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// True once an invalidation has marked this entry stale.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub(crate) fn mark_stale(&mut self) -> bool {
        !std::mem::replace(&mut self.stale, true)
    }

    /// Time elapsed since the value was stored.
    pub fn age(&self) -> Duration {
        let now = Utc::now();
        if now > self.cached_at {
            (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        }
    }
}
