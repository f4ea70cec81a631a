use crate::types::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Runtime events: the append-only audit trail for every process instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RuntimeEvent {
    InstanceStarted {
        definition_key: String,
        definition_version: u32,
    },
    TokenSpawned {
        token_id: Uuid,
        activity_id: String,
        parent: Option<Uuid>,
    },
    TransitionTaken {
        token_id: Uuid,
        transition_id: String,
        from: String,
        to: String,
    },
    TokenConsumed {
        token_id: Uuid,
        activity_id: String,
    },
    Forked {
        gateway_id: String,
        fork_id: Uuid,
        children: Vec<Uuid>,
    },
    JoinArrived {
        gateway_id: String,
        fork_id: Uuid,
        token_id: Uuid,
    },
    JoinReleased {
        gateway_id: String,
        fork_id: Uuid,
        token_id: Uuid,
    },
    /// A branch ended before reaching its join.
    BranchEnded {
        fork_id: Uuid,
        outstanding: u16,
    },
    ServiceInvoked {
        activity_id: String,
        handler: String,
        written: Vec<String>,
    },
    TaskCreated {
        task_id: Uuid,
        activity_id: String,
        assignee: Option<String>,
    },
    TaskClaimed {
        task_id: Uuid,
        user: String,
    },
    TaskUnclaimed {
        task_id: Uuid,
        previous: String,
    },
    TaskAssigned {
        task_id: Uuid,
        user: String,
        previous: Option<String>,
    },
    TaskCompleted {
        task_id: Uuid,
        variables: Vec<String>,
    },
    TaskCancelled {
        task_id: Uuid,
    },
    VariableSet {
        name: String,
        /// `None` for instance scope.
        task_id: Option<Uuid>,
    },
    Suspended,
    Resumed,
    /// A run stopped early because deletion was requested.
    Interrupted {
        pending_tokens: usize,
    },
    Completed {
        at: DateTime<Utc>,
    },
    Failed {
        kind: FailureKind,
        activity_id: String,
        message: String,
    },
    Deleted {
        reason: String,
    },
}
