use crate::definition::ProcessDefinition;
use crate::variables::VariableScope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

// ─── Value ────────────────────────────────────────────────────

/// A process variable. Values are compared as-is; there is no coercion
/// between variants apart from integer/float numeric comparison.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Structured document (objects, arrays, null).
    Document(serde_json::Value),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view used by ordering comparisons.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<serde_json::Value> for Value {
    /// Scalars map onto their own variants; everything else is a document.
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .unwrap_or(Value::Document(serde_json::Value::Number(n))),
            },
            other => Value::Document(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Document(doc) => write!(f, "{doc}"),
        }
    }
}

/// Name → value map used at the API boundary.
pub type Variables = BTreeMap<String, Value>;

// ─── Instance ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Active,
    Suspended,
    Finished,
    FinishedWithError,
    Deleted,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Finished => "finished",
            Self::FinishedWithError => "finished_with_error",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token lifecycle: `Pending → AtActivity → Advancing → (AtActivity | Consumed)`.
/// `WaitingAtJoin` parks a branch token until its siblings arrive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenState {
    Pending,
    AtActivity,
    Advancing,
    WaitingAtJoin,
    Consumed,
}

/// Execution cursor within one instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Token {
    pub token_id: Uuid,
    pub activity_id: String,
    pub state: TokenState,
    /// Enclosing parallel forks, innermost last.
    pub fork_stack: Vec<Uuid>,
    /// Task this token is parked on, if any.
    pub task_id: Option<Uuid>,
}

impl Token {
    pub fn new(activity_id: impl Into<String>, fork_stack: Vec<Uuid>) -> Self {
        Self {
            token_id: Uuid::now_v7(),
            activity_id: activity_id.into(),
            state: TokenState::Pending,
            fork_stack,
            task_id: None,
        }
    }
}

/// Book-keeping for one execution of a parallel fork.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForkScope {
    pub gateway_id: String,
    /// Branches that may still reach the join.
    pub outstanding: u16,
    /// Branch tokens parked at the join.
    pub waiting: Vec<Uuid>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub instance_id: Uuid,
    pub definition_key: String,
    pub definition_version: u32,
    pub status: InstanceStatus,
    pub variables: VariableScope,
    /// Live tokens only; consumed tokens are removed.
    pub tokens: BTreeMap<Uuid, Token>,
    pub forks: BTreeMap<Uuid, ForkScope>,
    pub started_at: DateTime<Utc>,
}

impl ProcessInstance {
    pub fn new(definition: &ProcessDefinition, variables: Variables) -> Self {
        Self {
            instance_id: Uuid::now_v7(),
            definition_key: definition.key.clone(),
            definition_version: definition.version,
            status: InstanceStatus::Active,
            variables: VariableScope::from(variables),
            tokens: BTreeMap::new(),
            forks: BTreeMap::new(),
            started_at: Utc::now(),
        }
    }
}

// ─── History ──────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    NoMatchingTransition,
    ServiceTaskFailed,
}

/// Why an instance ended in `FinishedWithError`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub activity_id: String,
    pub token_id: Uuid,
    pub message: String,
}

/// Read-only record of a finished, failed or deleted instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoricInstance {
    pub instance_id: Uuid,
    pub definition_key: String,
    pub definition_version: u32,
    pub status: InstanceStatus,
    pub variables: VariableScope,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub delete_reason: Option<String>,
    pub failure: Option<FailureRecord>,
}

impl HistoricInstance {
    pub fn from_instance(
        instance: &ProcessInstance,
        delete_reason: Option<String>,
        failure: Option<FailureRecord>,
    ) -> Self {
        Self {
            instance_id: instance.instance_id,
            definition_key: instance.definition_key.clone(),
            definition_version: instance.definition_version,
            status: instance.status,
            variables: instance.variables.clone(),
            started_at: instance.started_at,
            ended_at: Utc::now(),
            delete_reason,
            failure,
        }
    }
}

/// Either side of the instance repository.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InstanceView {
    Running(ProcessInstance),
    Historic(HistoricInstance),
}

impl InstanceView {
    pub fn instance_id(&self) -> Uuid {
        match self {
            InstanceView::Running(i) => i.instance_id,
            InstanceView::Historic(h) => h.instance_id,
        }
    }

    pub fn status(&self) -> InstanceStatus {
        match self {
            InstanceView::Running(i) => i.status,
            InstanceView::Historic(h) => h.status,
        }
    }

    pub fn variables(&self) -> &VariableScope {
        match self {
            InstanceView::Running(i) => &i.variables,
            InstanceView::Historic(h) => &h.variables,
        }
    }
}

// ─── Tasks ────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Open,
    Completed,
    /// The owning instance was deleted or failed while the task was open.
    Cancelled,
}

/// Human work item materialised from a user-task activity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub instance_id: Uuid,
    pub activity_id: String,
    pub token_id: Uuid,
    pub name: String,
    pub assignee: Option<String>,
    pub candidate_groups: BTreeSet<String>,
    pub status: TaskStatus,
    pub variables: VariableScope,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_open(&self) -> bool {
        self.status == TaskStatus::Open
    }
}

/// Filter for active-task listings. Empty fields match everything.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskQuery {
    pub instance_id: Option<Uuid>,
    pub assignee: Option<String>,
    pub candidate_group: Option<String>,
}

impl TaskQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn instance(mut self, instance_id: Uuid) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn assignee(mut self, user: impl Into<String>) -> Self {
        self.assignee = Some(user.into());
        self
    }

    pub fn candidate_group(mut self, group: impl Into<String>) -> Self {
        self.candidate_group = Some(group.into());
        self
    }

    /// Only open tasks ever match.
    pub fn matches(&self, task: &Task) -> bool {
        task.is_open()
            && self.instance_id.is_none_or(|id| task.instance_id == id)
            && self
                .assignee
                .as_deref()
                .is_none_or(|user| task.assignee.as_deref() == Some(user))
            && self
                .candidate_group
                .as_deref()
                .is_none_or(|group| task.candidate_groups.contains(group))
    }
}
