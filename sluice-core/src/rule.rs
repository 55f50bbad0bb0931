//! Invalidation rules.
//!
//! A rule reads "when `trigger` is written, and `condition` holds for the
//! write's payload, also invalidate `affects`". Rules are plain values; the
//! [`RuleTable`](crate::RuleTable) that owns them is immutable.

use std::borrow::Cow;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use indexmap::IndexSet;

use crate::error::ConditionError;
use crate::topic::TopicName;
use crate::Payload;

/// Which written topics fire a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    One(TopicName),
    /// Logical OR: writing any of these topics fires the rule.
    AnyOf(Vec<TopicName>),
}

impl Trigger {
    /// True if writing `topic` fires this trigger.
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::One(name) => name.as_str() == topic,
            Self::AnyOf(names) => names.iter().any(|name| name.as_str() == topic),
        }
    }

    /// Every topic name this trigger mentions.
    pub fn topics(&self) -> &[TopicName] {
        match self {
            Self::One(name) => std::slice::from_ref(name),
            Self::AnyOf(names) => names,
        }
    }
}

impl From<&'static str> for Trigger {
    fn from(name: &'static str) -> Self {
        Self::One(TopicName::from(name))
    }
}

impl From<TopicName> for Trigger {
    fn from(name: TopicName) -> Self {
        Self::One(name)
    }
}

impl<const N: usize> From<[&'static str; N]> for Trigger {
    fn from(names: [&'static str; N]) -> Self {
        Self::AnyOf(names.into_iter().map(TopicName::from).collect())
    }
}

type Label = Cow<'static, str>;

type PredicateFn = dyn Fn(&Payload) -> Result<bool, ConditionError> + Send + Sync;

/// Pure predicate over an opaque mutation payload.
///
/// The coordinator never looks inside the payload; only the predicate does.
#[derive(Clone)]
pub struct Predicate {
    label: Label,
    check: Arc<PredicateFn>,
}

impl Predicate {
    /// Wrap an arbitrary predicate. `label` shows up in logs and `Debug`.
    ///
    /// A panic inside `check` is caught by [`evaluate`](Self::evaluate) and
    /// reported as [`ConditionError::Rejected`], so it skips only the rule
    /// that owns the predicate. This relies on unwinding; with
    /// `panic = "abort"` a panicking predicate still takes the process down.
    pub fn new<F>(label: impl Into<Label>, check: F) -> Self
    where
        F: Fn(&Payload) -> Result<bool, ConditionError> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            check: Arc::new(check),
        }
    }

    /// Holds when the string field `field` equals one of `allowed`.
    pub fn field_in(field: &'static str, allowed: &'static [&'static str]) -> Self {
        Self::new(format!("{} in {:?}", field, allowed), move |payload| {
            let value = payload.get(field).ok_or_else(|| ConditionError::MissingField {
                field: field.to_string(),
            })?;
            let value = value.as_str().ok_or_else(|| ConditionError::TypeMismatch {
                field: field.to_string(),
                expected: "string".to_string(),
            })?;
            Ok(allowed.iter().any(|candidate| *candidate == value))
        })
    }

    /// Holds when `field` is present and equal to `expected`.
    pub fn field_equals(field: &'static str, expected: Payload) -> Self {
        Self::new(format!("{} == {}", field, expected), move |payload| {
            payload
                .get(field)
                .map(|value| value == &expected)
                .ok_or_else(|| ConditionError::MissingField {
                    field: field.to_string(),
                })
        })
    }

    /// Holds when the boolean field `field` is true.
    pub fn flag(field: &'static str) -> Self {
        Self::new(field, move |payload| {
            let value = payload.get(field).ok_or_else(|| ConditionError::MissingField {
                field: field.to_string(),
            })?;
            value.as_bool().ok_or_else(|| ConditionError::TypeMismatch {
                field: field.to_string(),
                expected: "bool".to_string(),
            })
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Evaluate the predicate against a payload.
    pub fn evaluate(&self, payload: &Payload) -> Result<bool, ConditionError> {
        catch_unwind(AssertUnwindSafe(|| (self.check)(payload))).unwrap_or_else(|_| {
            Err(ConditionError::Rejected {
                reason: format!("predicate '{}' panicked", self.label),
            })
        })
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.label).finish()
    }
}

/// Whether a rule is gated on its payload.
#[derive(Debug, Clone, Default)]
pub enum RuleCondition {
    #[default]
    Always,
    When(Predicate),
}

/// Outcome of checking a rule's condition for one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionOutcome {
    Satisfied,
    /// Condition declared but the caller supplied no payload.
    NoPayload,
    Unsatisfied,
    Failed(ConditionError),
}

impl RuleCondition {
    /// Check the condition. A declared condition with no payload is never
    /// satisfied.
    pub fn check(&self, payload: Option<&Payload>) -> ConditionOutcome {
        match (self, payload) {
            (Self::Always, _) => ConditionOutcome::Satisfied,
            (Self::When(_), None) => ConditionOutcome::NoPayload,
            (Self::When(predicate), Some(payload)) => match predicate.evaluate(payload) {
                Ok(true) => ConditionOutcome::Satisfied,
                Ok(false) => ConditionOutcome::Unsatisfied,
                Err(err) => ConditionOutcome::Failed(err),
            },
        }
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self, Self::When(_))
    }
}

/// One declarative invalidation rule.
#[derive(Debug, Clone)]
pub struct InvalidationRule {
    trigger: Trigger,
    affects: IndexSet<TopicName>,
    condition: RuleCondition,
    description: Label,
}

impl InvalidationRule {
    /// Start a rule fired by writes to `trigger`.
    pub fn when_written(trigger: impl Into<Trigger>) -> Self {
        Self {
            trigger: trigger.into(),
            affects: IndexSet::new(),
            condition: RuleCondition::Always,
            description: Label::Borrowed(""),
        }
    }

    /// Add topics to invalidate. Repeated names are kept once, first
    /// occurrence wins the position.
    pub fn affects<I, T>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TopicName>,
    {
        self.affects.extend(topics.into_iter().map(Into::into));
        self
    }

    /// Gate the rule on a payload predicate.
    pub fn only_if(mut self, predicate: Predicate) -> Self {
        self.condition = RuleCondition::When(predicate);
        self
    }

    pub fn describe(mut self, description: impl Into<Label>) -> Self {
        self.description = description.into();
        self
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn affected(&self) -> impl Iterator<Item = &TopicName> {
        self.affects.iter()
    }

    pub fn condition(&self) -> &RuleCondition {
        &self.condition
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Every topic name the rule mentions, trigger side first.
    pub fn referenced_topics(&self) -> impl Iterator<Item = &TopicName> {
        self.trigger.topics().iter().chain(self.affects.iter())
    }
}
