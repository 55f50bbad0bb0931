//! Topic registry.
//!
//! The registry is the enumerable set of cache topics known to a coordinator.
//! It is built once at startup and is read-only afterwards; lookups never
//! allocate beyond cloning the returned descriptor.

use indexmap::IndexMap;

use crate::error::ConfigError;
use crate::topic::{CacheKey, KeyBuilder, TopicKey, TopicKind, TopicName};
use crate::Payload;

/// Read-only lookup table from topic name to key descriptor.
#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    topics: IndexMap<TopicName, TopicKind>,
}

impl TopicRegistry {
    /// Start declaring a registry.
    pub fn builder() -> TopicRegistryBuilder {
        TopicRegistryBuilder::default()
    }

    /// Check whether a topic name is registered.
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Look up how a topic maps onto cache keys.
    pub fn resolve(&self, topic: &str) -> Option<&TopicKind> {
        self.topics.get(topic)
    }

    /// The eviction descriptor for a topic at topic granularity.
    ///
    /// Static topics resolve to their exact key, parameterized topics to
    /// their whole family.
    pub fn topic_key(&self, topic: &str) -> Result<TopicKey, ConfigError> {
        self.resolve(topic)
            .map(TopicKind::topic_key)
            .ok_or_else(|| ConfigError::UnknownTopic {
                topic: topic.to_string(),
            })
    }

    /// Build the concrete key of one instance of a parameterized topic.
    pub fn build_key(&self, topic: &str, params: &Payload) -> Result<CacheKey, ConfigError> {
        match self.resolve(topic) {
            Some(TopicKind::Parameterized { prefix, builder }) => {
                let suffix = builder.build(params)?;
                Ok(prefix.join(&suffix))
            }
            Some(TopicKind::Static { .. }) => Err(ConfigError::NotParameterized {
                topic: topic.to_string(),
            }),
            None => Err(ConfigError::UnknownTopic {
                topic: topic.to_string(),
            }),
        }
    }

    /// Registered topic names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &TopicName> {
        self.topics.keys()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

/// Declarative builder for [`TopicRegistry`].
///
/// Declaration errors are collected and reported by [`build`](Self::build)
/// so that the declaration site reads as a flat list.
#[derive(Debug, Default)]
pub struct TopicRegistryBuilder {
    topics: IndexMap<TopicName, TopicKind>,
    errors: Vec<ConfigError>,
}

impl TopicRegistryBuilder {
    /// Declare a static topic with a fixed key.
    pub fn static_topic(mut self, name: impl Into<TopicName>, key: impl Into<CacheKey>) -> Self {
        self.insert(name.into(), TopicKind::Static { key: key.into() });
        self
    }

    /// Declare a parameterized topic.
    ///
    /// Every key produced for this topic is `prefix` followed by whatever
    /// `builder` returns for the parameters.
    pub fn parameterized(
        mut self,
        name: impl Into<TopicName>,
        prefix: impl Into<CacheKey>,
        builder: KeyBuilder,
    ) -> Self {
        let name = name.into();
        let prefix = prefix.into();
        if prefix.is_empty() {
            self.errors.push(ConfigError::EmptyFamilyPrefix {
                topic: name.to_string(),
            });
            return self;
        }
        self.insert(name, TopicKind::Parameterized { prefix, builder });
        self
    }

    fn insert(&mut self, name: TopicName, kind: TopicKind) {
        if self.topics.contains_key(&name) {
            self.errors.push(ConfigError::DuplicateTopic {
                topic: name.to_string(),
            });
            return;
        }
        self.topics.insert(name, kind);
    }

    /// Finish the registry, failing on the first declaration error.
    pub fn build(self) -> Result<TopicRegistry, ConfigError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        Ok(TopicRegistry {
            topics: self.topics,
        })
    }
}
