//! The immutable invalidation rule table.

use std::sync::Arc;

use indexmap::IndexSet;

use crate::error::ConfigError;
use crate::registry::TopicRegistry;
use crate::rule::InvalidationRule;

/// Static, ordered list of invalidation rules.
///
/// Cloning is cheap: clones share the same rules. There is no API to mutate
/// a table after construction, so every resolver and scheduler built from it
/// sees the same configuration for its whole lifetime.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Arc<[InvalidationRule]>,
}

impl RuleTable {
    pub fn new(rules: Vec<InvalidationRule>) -> Self {
        Self {
            rules: rules.into(),
        }
    }

    /// Rules in declaration order.
    pub fn rules(&self) -> &[InvalidationRule] {
        &self.rules
    }

    /// Rules whose trigger equals or includes `trigger`, in table order.
    pub fn rules_for<'a>(&'a self, trigger: &'a str) -> impl Iterator<Item = &'a InvalidationRule> {
        self.rules.iter().filter(move |rule| rule.trigger().matches(trigger))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check that every topic any rule mentions exists in `registry`.
    ///
    /// Run once at startup. Reports every missing name, each once, in the
    /// order the table first mentions it.
    pub fn validate(&self, registry: &TopicRegistry) -> Result<(), ConfigError> {
        let missing: IndexSet<String> = self
            .rules
            .iter()
            .flat_map(InvalidationRule::referenced_topics)
            .filter(|topic| !registry.contains(topic.as_str()))
            .map(|topic| topic.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::UnresolvedTopics {
                missing: missing.into_iter().collect(),
            })
        }
    }
}

impl From<Vec<InvalidationRule>> for RuleTable {
    fn from(rules: Vec<InvalidationRule>) -> Self {
        Self::new(rules)
    }
}

impl FromIterator<InvalidationRule> for RuleTable {
    fn from_iter<I: IntoIterator<Item = InvalidationRule>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TopicRegistry {
        TopicRegistry::builder()
            .static_topic("JOURNAL_ENTRIES", ["journal-entries"])
            .static_topic("TRIAL_BALANCE", ["trial-balance"])
            .static_topic("ACCOUNTS", ["accounts"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_rules_for_matches_single_and_any_of() {
        let table = RuleTable::new(vec![
            InvalidationRule::when_written("JOURNAL_ENTRIES").affects(["TRIAL_BALANCE"]),
            InvalidationRule::when_written("ACCOUNTS").affects(["TRIAL_BALANCE"]),
            InvalidationRule::when_written(["ACCOUNTS", "JOURNAL_ENTRIES"]).affects(["ACCOUNTS"]),
        ]);

        assert_eq!(table.rules_for("JOURNAL_ENTRIES").count(), 2);
        assert_eq!(table.rules_for("ACCOUNTS").count(), 2);
        assert_eq!(table.rules_for("TRIAL_BALANCE").count(), 0);
    }

    #[test]
    fn test_validate_accepts_known_topics() {
        let table: RuleTable = vec![InvalidationRule::when_written("JOURNAL_ENTRIES")
            .affects(["TRIAL_BALANCE", "ACCOUNTS"])]
        .into();
        assert!(table.validate(&registry()).is_ok());
    }

    #[test]
    fn test_validate_reports_every_missing_topic_once() {
        let table = RuleTable::new(vec![
            InvalidationRule::when_written("JOURNAL_ENTRIES").affects(["LEDGER", "TRIAL_BALANCE"]),
            InvalidationRule::when_written(["BANK_RECONCILIATION", "ACCOUNTS"]).affects(["LEDGER"]),
        ]);

        let err = table.validate(&registry()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnresolvedTopics {
                missing: vec!["LEDGER".to_string(), "BANK_RECONCILIATION".to_string()],
            }
        );
    }

    #[test]
    fn test_clones_share_rules() {
        let table = RuleTable::new(vec![InvalidationRule::when_written("ACCOUNTS")]);
        let clone = table.clone();
        assert!(std::ptr::eq(table.rules().as_ptr(), clone.rules().as_ptr()));
    }
}
