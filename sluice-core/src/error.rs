//! Error types for SLUICE operations

use thiserror::Error;

/// Configuration errors.
///
/// Raised while building the topic registry, validating the rule table
/// against it, or loading coordinator settings. All of them are fatal at
/// startup; none of them are produced on the invalidation hot path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Topic declared twice in registry: {topic}")]
    DuplicateTopic { topic: String },

    #[error("Parameterized topic {topic} has an empty family prefix")]
    EmptyFamilyPrefix { topic: String },

    #[error("Rule table references topics missing from the registry: {missing:?}")]
    UnresolvedTopics { missing: Vec<String> },

    #[error("Unknown topic: {topic}")]
    UnknownTopic { topic: String },

    #[error("Topic {topic} is not parameterized")]
    NotParameterized { topic: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Errors a rule condition may report while inspecting a payload.
///
/// The resolver treats every one of these as "condition not satisfied".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("Payload has no field {field}")]
    MissingField { field: String },

    #[error("Payload field {field} has unexpected type, expected {expected}")]
    TypeMismatch { field: String, expected: String },

    #[error("Condition rejected payload: {reason}")]
    Rejected { reason: String },
}

/// Errors surfaced by the cache host while evicting topics.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Eviction failed for {key}: {reason}")]
    EvictionFailed { key: String, reason: String },

    #[error("Flush failed for {} of {attempted} topics: {failed:?}", failed.len())]
    FlushFailed {
        failed: Vec<String>,
        attempted: usize,
    },
}

/// Coalescing scheduler errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("No async runtime available to drive the coalescing timer")]
    NoRuntime,

    #[error("Scheduler has been shut down")]
    ShutDown,

    #[error("Scheduler state lock poisoned")]
    LockPoisoned,
}

/// Master error type for all SLUICE errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SluiceError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Condition error: {0}")]
    Condition(#[from] ConditionError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Result type alias for SLUICE operations.
pub type SluiceResult<T> = Result<T, SluiceError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display_unresolved_topics() {
        let err = ConfigError::UnresolvedTopics {
            missing: vec!["LEDGER".to_string(), "KPIS".to_string()],
        };
        let msg = format!("{}", err);
        assert!(msg.contains("missing from the registry"));
        assert!(msg.contains("LEDGER"));
        assert!(msg.contains("KPIS"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "SLUICE_COALESCE_WINDOW_MS".to_string(),
            value: "abc".to_string(),
            reason: "must be an integer".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("SLUICE_COALESCE_WINDOW_MS"));
        assert!(msg.contains("abc"));
        assert!(msg.contains("must be an integer"));
    }

    #[test]
    fn test_executor_error_display_flush_failed() {
        let err = ExecutorError::FlushFailed {
            failed: vec!["TRIAL_BALANCE".to_string()],
            attempted: 4,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("1 of 4"));
        assert!(msg.contains("TRIAL_BALANCE"));
    }

    #[test]
    fn test_sluice_error_from_variants() {
        let config = SluiceError::from(ConfigError::UnknownTopic {
            topic: "X".to_string(),
        });
        assert!(matches!(config, SluiceError::Config(_)));

        let condition = SluiceError::from(ConditionError::MissingField {
            field: "status".to_string(),
        });
        assert!(matches!(condition, SluiceError::Condition(_)));

        let executor = SluiceError::from(ExecutorError::EvictionFailed {
            key: "[\"contracts\"]".to_string(),
            reason: "offline".to_string(),
        });
        assert!(matches!(executor, SluiceError::Executor(_)));

        let scheduler = SluiceError::from(SchedulerError::ShutDown);
        assert!(matches!(scheduler, SluiceError::Scheduler(_)));
    }

    #[test]
    fn test_scheduler_error_display_no_runtime() {
        let msg = format!("{}", SchedulerError::NoRuntime);
        assert!(msg.contains("No async runtime"));
    }
}
