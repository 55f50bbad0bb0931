//! SLUICE Core - Topics, Rules and Resolution
//!
//! Static configuration and pure resolution for the cache-invalidation
//! coordinator. Everything in this crate is side-effect free except debug
//! logging; the executor contract is declared here so cache hosts can
//! implement it without depending on the scheduler.
//!
//! # Example
//!
//! ```ignore
//! let (registry, rules) = sluice_core::catalog::validated()?;
//! let resolver = RuleResolver::new(rules);
//!
//! let topics = resolver.affected_topics("CONTRACTS", Some(&json!({"status": "active"})));
//! // ["CONTRACTS", "PROPERTY_STATS", "RENTAL_PAYMENTS"]
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod registry;
pub mod resolver;
pub mod rule;
pub mod rule_table;
pub mod topic;

/// Opaque mutation payload. Only rule predicates and key builders look
/// inside it.
pub type Payload = serde_json::Value;

pub use config::CoalesceConfig;
pub use error::{
    ConditionError, ConfigError, ExecutorError, SchedulerError, SluiceError, SluiceResult,
};
pub use executor::{InvalidationExecutor, NoOpExecutor};
pub use registry::{TopicRegistry, TopicRegistryBuilder};
pub use resolver::{Resolution, RuleResolver};
pub use rule::{ConditionOutcome, InvalidationRule, Predicate, RuleCondition, Trigger};
pub use rule_table::RuleTable;
pub use topic::{CacheKey, KeyBuilder, KeyPart, TopicKey, TopicKind, TopicName};
