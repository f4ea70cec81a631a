//! Engine error taxonomy.
//!
//! Every failure reaches the caller as a typed variant; storage seams return
//! `anyhow::Result` and are folded in through [`EngineError::Store`].

use crate::types::{FailureKind, FailureRecord};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("process definition not found: {key} (version {version:?})")]
    DefinitionNotFound { key: String, version: Option<u32> },

    #[error("invalid process definition {key}: {}", .errors.join("; "))]
    InvalidDefinition { key: String, errors: Vec<String> },

    #[error("process instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("process instance {0} is suspended")]
    InstanceSuspended(Uuid),

    #[error("process instance {instance_id} is busy (lock not acquired within {waited_ms}ms)")]
    InstanceBusy { instance_id: Uuid, waited_ms: u64 },

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("task {0} is already completed")]
    TaskAlreadyCompleted(Uuid),

    #[error("task {task_id} is already claimed by {assignee}")]
    AlreadyClaimed { task_id: Uuid, assignee: String },

    #[error("task {0} is not claimed")]
    NotClaimed(Uuid),

    #[error("no outgoing transition of {activity_id} matched (instance {instance_id})")]
    NoMatchingTransition { instance_id: Uuid, activity_id: String },

    #[error("service task {activity_id} failed (instance {instance_id}): {message}")]
    ServiceTaskFailed {
        instance_id: Uuid,
        activity_id: String,
        message: String,
    },

    #[error("instance {instance_id} exceeded {limit} steps in one run")]
    StepLimitExceeded { instance_id: Uuid, limit: usize },

    #[error("definition parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("internal engine error: {0}")]
    Internal(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    /// Callers may retry these with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::InstanceBusy { .. })
    }

    pub(crate) fn from_failure(instance_id: Uuid, record: &FailureRecord) -> Self {
        match record.kind {
            FailureKind::NoMatchingTransition => EngineError::NoMatchingTransition {
                instance_id,
                activity_id: record.activity_id.clone(),
            },
            FailureKind::ServiceTaskFailed => EngineError::ServiceTaskFailed {
                instance_id,
                activity_id: record.activity_id.clone(),
                message: record.message.clone(),
            },
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_busy_is_retryable() {
        let id = Uuid::now_v7();
        assert!(EngineError::InstanceBusy {
            instance_id: id,
            waited_ms: 10
        }
        .is_retryable());
        assert!(!EngineError::InstanceSuspended(id).is_retryable());
        assert!(!EngineError::TaskNotFound(id).is_retryable());
    }

    #[test]
    fn test_invalid_definition_message_joins_errors() {
        let err = EngineError::InvalidDefinition {
            key: "p".into(),
            errors: vec!["[V3] a".into(), "[V4] b".into()],
        };
        assert_eq!(err.to_string(), "invalid process definition p: [V3] a; [V4] b");
    }
}
