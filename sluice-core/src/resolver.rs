//! Rule resolution.
//!
//! Given a written topic and its optional payload, the resolver produces
//! the de-duplicated set of topics to invalidate now. Resolution is a single
//! pass over the rule table and expands exactly one level: topics added by
//! a rule never trigger further rules within the same resolution. Chains of
//! effects are declared as additional direct entries on the original
//! trigger.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::rule::ConditionOutcome;
use crate::rule_table::RuleTable;
use crate::topic::TopicName;
use crate::Payload;

/// The ordered, duplicate-free set of topics produced by one resolution.
///
/// The trigger always comes first, then rule-contributed topics in
/// rule-table order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    topics: IndexSet<TopicName>,
}

impl Resolution {
    fn seeded(trigger: TopicName) -> Self {
        let mut topics = IndexSet::new();
        topics.insert(trigger);
        Self { topics }
    }

    /// The written topic this resolution started from.
    ///
    /// For merged resolutions this is the trigger of the first one.
    pub fn trigger(&self) -> Option<&TopicName> {
        self.topics.first()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopicName> {
        self.topics.iter()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Union `other` into this resolution, keeping first-seen order.
    pub fn merge(&mut self, other: Resolution) {
        self.topics.extend(other.topics);
    }

    pub fn into_vec(self) -> Vec<TopicName> {
        self.topics.into_iter().collect()
    }
}

impl IntoIterator for Resolution {
    type Item = TopicName;
    type IntoIter = indexmap::set::IntoIter<TopicName>;

    fn into_iter(self) -> Self::IntoIter {
        self.topics.into_iter()
    }
}

/// Resolves written topics against an injected rule table.
#[derive(Debug, Clone, Default)]
pub struct RuleResolver {
    rules: RuleTable,
}

impl RuleResolver {
    pub fn new(rules: RuleTable) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Topics to invalidate because `trigger` was written.
    ///
    /// Unknown triggers are not an error: with no matching rule the result is
    /// just the trigger itself. A conditional rule fires only when a payload
    /// is supplied and its predicate returns `Ok(true)`; a missing payload,
    /// a `false`, or a predicate error skips that rule alone.
    pub fn affected_topics(
        &self,
        trigger: impl Into<TopicName>,
        payload: Option<&Payload>,
    ) -> Resolution {
        let trigger = trigger.into();
        let mut resolution = Resolution::seeded(trigger.clone());

        for (index, rule) in self
            .rules
            .rules()
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.trigger().matches(trigger.as_str()))
        {
            match rule.condition().check(payload) {
                ConditionOutcome::Satisfied => {
                    resolution.topics.extend(rule.affected().cloned());
                }
                ConditionOutcome::NoPayload => {
                    tracing::debug!(
                        trigger = %trigger,
                        rule = index,
                        description = rule.description(),
                        "Skipping conditional rule: no payload supplied"
                    );
                }
                ConditionOutcome::Unsatisfied => {
                    tracing::debug!(
                        trigger = %trigger,
                        rule = index,
                        description = rule.description(),
                        "Skipping conditional rule: condition not met"
                    );
                }
                ConditionOutcome::Failed(err) => {
                    tracing::debug!(
                        trigger = %trigger,
                        rule = index,
                        description = rule.description(),
                        error = %err,
                        "Skipping conditional rule: condition failed"
                    );
                }
            }
        }

        resolution
    }
}
