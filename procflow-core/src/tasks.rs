//! Task materialisation and the claim rules.
//!
//! These functions only mutate the `Task` they are handed; the engine decides
//! when the result is persisted.

use crate::definition::{Activity, ActivityKind};
use crate::error::{EngineError, EngineResult};
use crate::types::{ProcessInstance, Task, TaskStatus, Value};
use crate::variables::{ScopeChain, VariableScope};
use chrono::Utc;
use uuid::Uuid;

/// Build the OPEN task for a token parked on a user-task activity.
pub(crate) fn materialize(instance: &ProcessInstance, activity: &Activity, token_id: Uuid) -> Task {
    let (assignee, candidate_groups) = match &activity.kind {
        ActivityKind::UserTask {
            assignee,
            candidate_groups,
        } => (
            assignee
                .as_deref()
                .and_then(|expr| resolve_assignee(expr, &instance.variables)),
            candidate_groups.clone(),
        ),
        _ => (None, Default::default()),
    };

    Task {
        task_id: Uuid::now_v7(),
        instance_id: instance.instance_id,
        activity_id: activity.id.clone(),
        token_id,
        name: activity.display_name().to_string(),
        assignee,
        candidate_groups,
        status: TaskStatus::Open,
        variables: VariableScope::new(),
        created_at: Utc::now(),
        ended_at: None,
    }
}

/// `${var}` reads the instance scope; anything else is a literal user id.
/// An expression over a missing variable leaves the task unassigned.
fn resolve_assignee(expr: &str, scope: &VariableScope) -> Option<String> {
    let Some(name) = expr
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    else {
        return Some(expr.to_string());
    };

    match ScopeChain::instance(scope).get(name.trim()) {
        Some(Value::Str(user)) => Some(user.clone()),
        Some(other) => Some(other.to_string()),
        None => {
            tracing::warn!("Tasks: assignee expression {} unresolved, leaving unassigned", expr);
            None
        }
    }
}

pub fn ensure_open(task: &Task) -> EngineResult<()> {
    if task.is_open() {
        Ok(())
    } else {
        Err(EngineError::TaskAlreadyCompleted(task.task_id))
    }
}

/// Returns `false` when `user` already holds the task.
pub fn claim(task: &mut Task, user: &str) -> EngineResult<bool> {
    ensure_open(task)?;
    match task.assignee.as_deref() {
        Some(current) if current == user => Ok(false),
        Some(current) => Err(EngineError::AlreadyClaimed {
            task_id: task.task_id,
            assignee: current.to_string(),
        }),
        None => {
            task.assignee = Some(user.to_string());
            Ok(true)
        }
    }
}

/// Returns the user the task was released from.
pub fn unclaim(task: &mut Task) -> EngineResult<String> {
    ensure_open(task)?;
    task.assignee
        .take()
        .ok_or(EngineError::NotClaimed(task.task_id))
}

/// Administrative override; returns the previous assignee.
pub fn assign(task: &mut Task, user: &str) -> EngineResult<Option<String>> {
    ensure_open(task)?;
    Ok(task.assignee.replace(user.to_string()))
}

pub(crate) fn close(task: &mut Task, status: TaskStatus) {
    task.status = status;
    task.ended_at = Some(Utc::now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authoring::parse_definition_yaml;
    use crate::definition::ProcessDefinition;
    use crate::types::Variables;

    const REVIEW: &str = r#"
key: review
nodes:
  - kind: Start
    id: start
  - kind: UserTask
    id: review
    name: Review
    assignee: "${owner}"
    candidate_groups: [reviewers]
  - kind: End
    id: end
edges:
  - from: start
    to: review
  - from: review
    to: end
"#;

    fn review_task(vars: Variables) -> Task {
        let def = ProcessDefinition::from_dto(&parse_definition_yaml(REVIEW).unwrap(), 1).unwrap();
        let instance = ProcessInstance::new(&def, vars);
        materialize(&instance, def.activity("review").unwrap(), Uuid::now_v7())
    }

    #[test]
    fn test_materialize_resolves_assignee_expression() {
        let task = review_task(Variables::from([("owner".to_string(), Value::from("carol"))]));
        assert_eq!(task.name, "Review");
        assert_eq!(task.assignee.as_deref(), Some("carol"));
        assert!(task.candidate_groups.contains("reviewers"));
        assert!(task.is_open());

        let unassigned = review_task(Variables::new());
        assert_eq!(unassigned.assignee, None);
    }

    #[test]
    fn test_literal_assignee() {
        assert_eq!(
            resolve_assignee("dave", &VariableScope::new()).as_deref(),
            Some("dave")
        );
    }

    #[test]
    fn test_claim_rules() {
        let mut task = review_task(Variables::new());

        assert!(claim(&mut task, "alice").unwrap());
        // idempotent for the same user
        assert!(!claim(&mut task, "alice").unwrap());
        match claim(&mut task, "bob") {
            Err(EngineError::AlreadyClaimed { assignee, .. }) => assert_eq!(assignee, "alice"),
            other => panic!("expected AlreadyClaimed, got {:?}", other),
        }

        assert_eq!(unclaim(&mut task).unwrap(), "alice");
        assert!(matches!(unclaim(&mut task), Err(EngineError::NotClaimed(_))));

        assert_eq!(assign(&mut task, "bob").unwrap(), None);
        assert_eq!(assign(&mut task, "erin").unwrap().as_deref(), Some("bob"));
    }

    #[test]
    fn test_closed_task_refuses_changes() {
        let mut task = review_task(Variables::new());
        close(&mut task, TaskStatus::Completed);
        assert!(task.ended_at.is_some());
        assert!(matches!(
            claim(&mut task, "alice"),
            Err(EngineError::TaskAlreadyCompleted(_))
        ));
        assert!(matches!(
            ensure_open(&task),
            Err(EngineError::TaskAlreadyCompleted(_))
        ));
    }
}
