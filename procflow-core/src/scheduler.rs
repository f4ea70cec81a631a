//! Token scheduler.
//!
//! A run drives a worklist of token entries over a staged copy of the
//! instance until every token is parked (user task, join wait) or consumed.
//! Nothing here touches the store: the engine commits the staged
//! `ExecutionContext` once the run returns, or discards it on error.

use crate::authoring::GatewayDirection;
use crate::definition::{Activity, ActivityKind, ProcessDefinition};
use crate::error::{EngineError, EngineResult};
use crate::events::RuntimeEvent;
use crate::service::{ServiceContext, ServiceRegistry};
use crate::tasks;
use crate::types::*;
use crate::variables::ScopeChain;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Staged state of one engine operation on one instance.
pub struct ExecutionContext {
    pub instance: ProcessInstance,
    pub definition: Arc<ProcessDefinition>,
    /// Tasks created or modified by this operation, keyed by id.
    pub tasks: BTreeMap<Uuid, Task>,
    pub events: Vec<RuntimeEvent>,
    /// Token moves taken so far in this run.
    pub steps: usize,
}

impl ExecutionContext {
    pub fn new(instance: ProcessInstance, definition: Arc<ProcessDefinition>) -> Self {
        Self {
            instance,
            definition,
            tasks: BTreeMap::new(),
            events: Vec::new(),
            steps: 0,
        }
    }

    fn token_mut(&mut self, token_id: Uuid) -> EngineResult<&mut Token> {
        self.instance
            .tokens
            .get_mut(&token_id)
            .ok_or_else(|| EngineError::Internal(format!("token {} not live", token_id)))
    }

    fn consume(&mut self, token_id: Uuid) -> Option<Token> {
        let token = self.instance.tokens.remove(&token_id)?;
        self.events.push(RuntimeEvent::TokenConsumed {
            token_id,
            activity_id: token.activity_id.clone(),
        });
        Some(token)
    }
}

/// A unit of work for the run loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entry {
    /// The token has just reached its activity.
    Arrive(Uuid),
    /// The token is done with its activity and takes an outgoing transition.
    Leave(Uuid),
}

#[derive(Debug)]
pub enum RunOutcome {
    /// Tokens remain, all parked.
    Stable,
    /// No tokens remain.
    Finished,
    /// Terminal failure; all tokens were consumed.
    Failed(FailureRecord),
    /// Stopped early on a cancellation request.
    Interrupted { pending: usize },
}

pub struct Scheduler {
    services: Arc<ServiceRegistry>,
    max_steps: usize,
}

impl Scheduler {
    pub fn new(services: Arc<ServiceRegistry>, max_steps: usize) -> Self {
        Self {
            services,
            max_steps,
        }
    }

    /// Place the first token on the start activity.
    pub fn seed(&self, ctx: &mut ExecutionContext) -> Entry {
        let token = Token::new(ctx.definition.start_activity(), Vec::new());
        let token_id = token.token_id;
        ctx.events.push(RuntimeEvent::TokenSpawned {
            token_id,
            activity_id: token.activity_id.clone(),
            parent: None,
        });
        ctx.instance.tokens.insert(token_id, token);
        Entry::Arrive(token_id)
    }

    /// Release the token parked on a completed task.
    pub fn resume_parked(&self, ctx: &mut ExecutionContext, token_id: Uuid) -> EngineResult<Entry> {
        let token = ctx.token_mut(token_id)?;
        if token.state != TokenState::AtActivity || token.task_id.is_none() {
            return Err(EngineError::Internal(format!(
                "token {} is not parked on a task",
                token_id
            )));
        }
        token.task_id = None;
        Ok(Entry::Leave(token_id))
    }

    /// Drive tokens until the instance stabilises.
    ///
    /// `cancel` is checked between entries only, so a transition is never
    /// half-taken when a run stops.
    pub async fn run(
        &self,
        ctx: &mut ExecutionContext,
        start: Entry,
        cancel: &AtomicBool,
    ) -> EngineResult<RunOutcome> {
        let mut work = VecDeque::from([start]);

        while let Some(entry) = work.pop_front() {
            if cancel.load(Ordering::Acquire) {
                let pending = work.len() + 1;
                tracing::info!(
                    "Scheduler: {} interrupted with {} pending entries",
                    ctx.instance.instance_id,
                    pending
                );
                ctx.events.push(RuntimeEvent::Interrupted {
                    pending_tokens: pending,
                });
                return Ok(RunOutcome::Interrupted { pending });
            }

            let failure = match entry {
                Entry::Arrive(token_id) => self.arrive(ctx, token_id, &mut work).await?,
                Entry::Leave(token_id) => self.leave(ctx, token_id, &mut work)?,
            };
            if let Some(record) = failure {
                return Ok(RunOutcome::Failed(record));
            }
        }

        if ctx.instance.tokens.is_empty() {
            Ok(RunOutcome::Finished)
        } else {
            Ok(RunOutcome::Stable)
        }
    }

    fn step(&self, ctx: &mut ExecutionContext) -> EngineResult<()> {
        ctx.steps += 1;
        if ctx.steps > self.max_steps {
            tracing::warn!(
                "Scheduler: {} exceeded {} steps",
                ctx.instance.instance_id,
                self.max_steps
            );
            return Err(EngineError::StepLimitExceeded {
                instance_id: ctx.instance.instance_id,
                limit: self.max_steps,
            });
        }
        Ok(())
    }

    async fn arrive(
        &self,
        ctx: &mut ExecutionContext,
        token_id: Uuid,
        work: &mut VecDeque<Entry>,
    ) -> EngineResult<Option<FailureRecord>> {
        let definition = Arc::clone(&ctx.definition);
        let token = ctx.token_mut(token_id)?;
        token.state = TokenState::AtActivity;
        let activity_id = token.activity_id.clone();
        let activity = definition.activity(&activity_id).ok_or_else(|| {
            EngineError::Internal(format!("activity {} not in definition", activity_id))
        })?;

        match &activity.kind {
            ActivityKind::Start | ActivityKind::ExclusiveGateway => {
                work.push_back(Entry::Leave(token_id));
                Ok(None)
            }
            ActivityKind::UserTask { .. } => {
                self.park_on_task(ctx, token_id, activity)?;
                Ok(None)
            }
            ActivityKind::ServiceTask { handler } => {
                self.invoke_service(ctx, token_id, activity, handler, work)
                    .await
            }
            ActivityKind::ParallelGateway {
                direction: GatewayDirection::Diverging,
            } => self.fork(ctx, token_id, activity, work),
            ActivityKind::ParallelGateway {
                direction: GatewayDirection::Converging,
            } => self.join(ctx, token_id, work),
            ActivityKind::End => {
                if let Some(token) = ctx.consume(token_id) {
                    tracing::debug!(
                        "Scheduler: token {} ended at {}",
                        token_id,
                        activity.id
                    );
                    self.branch_ended(ctx, token.fork_stack, work)?;
                }
                Ok(None)
            }
        }
    }

    fn leave(
        &self,
        ctx: &mut ExecutionContext,
        token_id: Uuid,
        work: &mut VecDeque<Entry>,
    ) -> EngineResult<Option<FailureRecord>> {
        let definition = Arc::clone(&ctx.definition);
        let activity_id = {
            let token = ctx.token_mut(token_id)?;
            token.state = TokenState::Advancing;
            token.activity_id.clone()
        };

        let scope = ScopeChain::instance(&ctx.instance.variables);
        let Some(transition) = definition.select_transition(&activity_id, &scope) else {
            let message = format!("no outgoing transition of {} matched", activity_id);
            return Ok(Some(self.fail(
                ctx,
                FailureKind::NoMatchingTransition,
                &activity_id,
                token_id,
                message,
            )));
        };

        self.step(ctx)?;
        let token = ctx.token_mut(token_id)?;
        token.activity_id = transition.to.clone();
        token.state = TokenState::Pending;
        tracing::debug!(
            "Scheduler: token {} {} -> {}",
            token_id,
            transition.from,
            transition.to
        );
        ctx.events.push(RuntimeEvent::TransitionTaken {
            token_id,
            transition_id: transition.id.clone(),
            from: transition.from.clone(),
            to: transition.to.clone(),
        });
        work.push_back(Entry::Arrive(token_id));
        Ok(None)
    }

    fn park_on_task(
        &self,
        ctx: &mut ExecutionContext,
        token_id: Uuid,
        activity: &Activity,
    ) -> EngineResult<()> {
        let task = tasks::materialize(&ctx.instance, activity, token_id);
        let task_id = task.task_id;
        ctx.token_mut(token_id)?.task_id = Some(task_id);

        tracing::debug!(
            "Scheduler: task {} created at {} (assignee {:?})",
            task_id,
            activity.id,
            task.assignee
        );
        ctx.events.push(RuntimeEvent::TaskCreated {
            task_id,
            activity_id: activity.id.clone(),
            assignee: task.assignee.clone(),
        });
        ctx.tasks.insert(task_id, task);
        Ok(())
    }

    async fn invoke_service(
        &self,
        ctx: &mut ExecutionContext,
        token_id: Uuid,
        activity: &Activity,
        handler_name: &str,
        work: &mut VecDeque<Entry>,
    ) -> EngineResult<Option<FailureRecord>> {
        let Some(handler) = self.services.get(handler_name) else {
            let message = format!("no service handler registered as {}", handler_name);
            return Ok(Some(self.fail(
                ctx,
                FailureKind::ServiceTaskFailed,
                &activity.id,
                token_id,
                message,
            )));
        };

        let service_ctx = ServiceContext {
            instance_id: ctx.instance.instance_id,
            activity_id: activity.id.clone(),
            variables: ctx.instance.variables.snapshot(),
        };
        match handler.execute(&service_ctx).await {
            Ok(output) => {
                ctx.instance.variables.merge(&output);
                ctx.events.push(RuntimeEvent::ServiceInvoked {
                    activity_id: activity.id.clone(),
                    handler: handler_name.to_string(),
                    written: output.keys().cloned().collect(),
                });
                work.push_back(Entry::Leave(token_id));
                Ok(None)
            }
            Err(e) => Ok(Some(self.fail(
                ctx,
                FailureKind::ServiceTaskFailed,
                &activity.id,
                token_id,
                format!("{:#}", e),
            ))),
        }
    }

    /// One child per enabled outgoing transition; the parent is consumed.
    fn fork(
        &self,
        ctx: &mut ExecutionContext,
        token_id: Uuid,
        gateway: &Activity,
        work: &mut VecDeque<Entry>,
    ) -> EngineResult<Option<FailureRecord>> {
        let definition = Arc::clone(&ctx.definition);
        let scope = ScopeChain::instance(&ctx.instance.variables);
        let branches: Vec<_> = definition
            .outgoing(&gateway.id)
            .filter(|t| t.is_enabled(&scope))
            .collect();

        if branches.is_empty() {
            let message = format!("no branch of fork {} is enabled", gateway.id);
            return Ok(Some(self.fail(
                ctx,
                FailureKind::NoMatchingTransition,
                &gateway.id,
                token_id,
                message,
            )));
        }
        let outstanding = u16::try_from(branches.len())
            .map_err(|_| EngineError::Internal(format!("fork {} too wide", gateway.id)))?;

        let Some(parent) = ctx.consume(token_id) else {
            return Err(EngineError::Internal(format!("token {} not live", token_id)));
        };
        let fork_id = Uuid::now_v7();
        let mut stack = parent.fork_stack;
        stack.push(fork_id);
        ctx.instance.forks.insert(
            fork_id,
            ForkScope {
                gateway_id: gateway.id.clone(),
                outstanding,
                waiting: Vec::new(),
            },
        );

        let mut children = Vec::with_capacity(branches.len());
        for transition in branches {
            self.step(ctx)?;
            let child = Token::new(transition.to.clone(), stack.clone());
            let child_id = child.token_id;
            ctx.events.push(RuntimeEvent::TokenSpawned {
                token_id: child_id,
                activity_id: gateway.id.clone(),
                parent: Some(token_id),
            });
            ctx.events.push(RuntimeEvent::TransitionTaken {
                token_id: child_id,
                transition_id: transition.id.clone(),
                from: transition.from.clone(),
                to: transition.to.clone(),
            });
            ctx.instance.tokens.insert(child_id, child);
            work.push_back(Entry::Arrive(child_id));
            children.push(child_id);
        }

        tracing::debug!(
            "Scheduler: fork {} at {} spawned {} branches",
            fork_id,
            gateway.id,
            children.len()
        );
        ctx.events.push(RuntimeEvent::Forked {
            gateway_id: gateway.id.clone(),
            fork_id,
            children,
        });
        Ok(None)
    }

    /// Park the token on its innermost fork; a token outside any fork passes.
    fn join(
        &self,
        ctx: &mut ExecutionContext,
        token_id: Uuid,
        work: &mut VecDeque<Entry>,
    ) -> EngineResult<Option<FailureRecord>> {
        let token = ctx.token_mut(token_id)?;
        let Some(&fork_id) = token.fork_stack.last() else {
            work.push_back(Entry::Leave(token_id));
            return Ok(None);
        };
        token.state = TokenState::WaitingAtJoin;
        let gateway_id = token.activity_id.clone();

        let scope = ctx
            .instance
            .forks
            .get_mut(&fork_id)
            .ok_or_else(|| EngineError::Internal(format!("fork {} not open", fork_id)))?;
        scope.waiting.push(token_id);
        ctx.events.push(RuntimeEvent::JoinArrived {
            gateway_id,
            fork_id,
            token_id,
        });

        self.try_release(ctx, fork_id, work)?;
        Ok(None)
    }

    /// Merge the waiting branches once none are outstanding elsewhere.
    fn try_release(
        &self,
        ctx: &mut ExecutionContext,
        fork_id: Uuid,
        work: &mut VecDeque<Entry>,
    ) -> EngineResult<()> {
        let ready = ctx.instance.forks.get(&fork_id).is_some_and(|scope| {
            !scope.waiting.is_empty() && scope.waiting.len() >= usize::from(scope.outstanding)
        });
        if !ready {
            return Ok(());
        }
        let Some(scope) = ctx.instance.forks.remove(&fork_id) else {
            return Ok(());
        };

        // The merged token continues from the join the last branch reached.
        let mut at = None;
        for waiting_id in &scope.waiting {
            if let Some(token) = ctx.consume(*waiting_id) {
                at = Some((token.activity_id, token.fork_stack));
            }
        }
        let (gateway_id, mut stack) = at.ok_or_else(|| {
            EngineError::Internal(format!("fork {} released without tokens", fork_id))
        })?;
        stack.pop();

        // An enclosing fork with branches converging at this same gateway is
        // joined here before the token moves on.
        let rejoin = stack
            .last()
            .and_then(|outer| ctx.instance.forks.get(outer))
            .is_some_and(|outer| {
                ctx.definition
                    .converges_at(&outer.gateway_id, &gateway_id, &scope.gateway_id)
            });

        let mut merged = Token::new(gateway_id.clone(), stack);
        merged.state = TokenState::AtActivity;
        let merged_id = merged.token_id;
        ctx.instance.tokens.insert(merged_id, merged);

        tracing::debug!(
            "Scheduler: join {} released fork {} ({} branches)",
            gateway_id,
            fork_id,
            scope.waiting.len()
        );
        ctx.events.push(RuntimeEvent::TokenSpawned {
            token_id: merged_id,
            activity_id: gateway_id.clone(),
            parent: None,
        });
        ctx.events.push(RuntimeEvent::JoinReleased {
            gateway_id,
            fork_id,
            token_id: merged_id,
        });
        work.push_back(if rejoin {
            Entry::Arrive(merged_id)
        } else {
            Entry::Leave(merged_id)
        });
        Ok(())
    }

    /// A branch reached an end activity: it will never arrive at its join.
    /// A fork whose branches have all ended counts as one ended branch of the
    /// enclosing fork.
    fn branch_ended(
        &self,
        ctx: &mut ExecutionContext,
        mut stack: Vec<Uuid>,
        work: &mut VecDeque<Entry>,
    ) -> EngineResult<()> {
        while let Some(fork_id) = stack.pop() {
            let Some(scope) = ctx.instance.forks.get_mut(&fork_id) else {
                return Err(EngineError::Internal(format!("fork {} not open", fork_id)));
            };
            scope.outstanding = scope.outstanding.saturating_sub(1);
            let outstanding = scope.outstanding;
            let drained = outstanding == 0 && scope.waiting.is_empty();
            ctx.events.push(RuntimeEvent::BranchEnded {
                fork_id,
                outstanding,
            });

            if !drained {
                return self.try_release(ctx, fork_id, work);
            }
            ctx.instance.forks.remove(&fork_id);
        }
        Ok(())
    }

    /// Terminal failure: every token is consumed and the instance is marked
    /// `FinishedWithError`. Open tasks are cancelled by the engine at commit.
    fn fail(
        &self,
        ctx: &mut ExecutionContext,
        kind: FailureKind,
        activity_id: &str,
        token_id: Uuid,
        message: String,
    ) -> FailureRecord {
        tracing::warn!(
            "Scheduler: {} failed at {}: {}",
            ctx.instance.instance_id,
            activity_id,
            message
        );
        terminate(ctx);
        ctx.instance.status = InstanceStatus::FinishedWithError;
        ctx.events.push(RuntimeEvent::Failed {
            kind,
            activity_id: activity_id.to_string(),
            message: message.clone(),
        });
        FailureRecord {
            kind,
            activity_id: activity_id.to_string(),
            token_id,
            message,
        }
    }
}

/// Consume every live token and drop all fork book-keeping.
pub(crate) fn terminate(ctx: &mut ExecutionContext) {
    let live: Vec<Uuid> = ctx.instance.tokens.keys().copied().collect();
    for token_id in live {
        ctx.consume(token_id);
    }
    ctx.instance.forks.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authoring::parse_definition_yaml;
    use crate::service::ServiceHandler;
    use anyhow::anyhow;

    fn definition(yaml: &str) -> Arc<ProcessDefinition> {
        Arc::new(ProcessDefinition::from_dto(&parse_definition_yaml(yaml).unwrap(), 1).unwrap())
    }

    fn context(def: &Arc<ProcessDefinition>, vars: Variables) -> ExecutionContext {
        ExecutionContext::new(ProcessInstance::new(def, vars), def.clone())
    }

    async fn start(
        scheduler: &Scheduler,
        ctx: &mut ExecutionContext,
    ) -> EngineResult<RunOutcome> {
        let entry = scheduler.seed(ctx);
        scheduler.run(ctx, entry, &AtomicBool::new(false)).await
    }

    async fn complete(
        scheduler: &Scheduler,
        ctx: &mut ExecutionContext,
        activity_id: &str,
    ) -> EngineResult<RunOutcome> {
        let task = ctx
            .tasks
            .values_mut()
            .find(|t| t.activity_id == activity_id && t.is_open())
            .unwrap();
        tasks::close(task, TaskStatus::Completed);
        let token_id = task.token_id;
        let entry = scheduler.resume_parked(ctx, token_id)?;
        scheduler.run(ctx, entry, &AtomicBool::new(false)).await
    }

    const FORK_JOIN: &str = r#"
key: fork_join
nodes:
  - { kind: Start, id: start }
  - { kind: ParallelGateway, id: split, direction: Diverging }
  - { kind: UserTask, id: legal }
  - { kind: UserTask, id: finance }
  - { kind: UserTask, id: ops }
  - { kind: ParallelGateway, id: merge, direction: Converging }
  - { kind: UserTask, id: sign_off }
  - { kind: End, id: end }
edges:
  - { from: start, to: split }
  - { from: split, to: legal }
  - { from: split, to: finance }
  - { from: split, to: ops }
  - { from: legal, to: merge }
  - { from: finance, to: merge }
  - { from: ops, to: merge }
  - { from: merge, to: sign_off }
  - { from: sign_off, to: end }
"#;

    fn open_at(ctx: &ExecutionContext, activity_id: &str) -> usize {
        ctx.tasks
            .values()
            .filter(|t| t.activity_id == activity_id && t.is_open())
            .count()
    }

    #[tokio::test]
    async fn test_fork_join_releases_once() {
        let scheduler = Scheduler::new(Arc::new(ServiceRegistry::new()), 100);
        let def = definition(FORK_JOIN);
        let mut ctx = context(&def, Variables::new());

        assert!(matches!(start(&scheduler, &mut ctx).await.unwrap(), RunOutcome::Stable));
        assert_eq!(ctx.instance.tokens.len(), 3);
        assert_eq!(ctx.instance.forks.len(), 1);

        complete(&scheduler, &mut ctx, "legal").await.unwrap();
        complete(&scheduler, &mut ctx, "finance").await.unwrap();
        assert_eq!(open_at(&ctx, "sign_off"), 0, "join released early");

        complete(&scheduler, &mut ctx, "ops").await.unwrap();
        assert_eq!(open_at(&ctx, "sign_off"), 1);
        assert_eq!(ctx.instance.tokens.len(), 1);
        assert!(ctx.instance.forks.is_empty());
        let released = ctx
            .events
            .iter()
            .filter(|e| matches!(e, RuntimeEvent::JoinReleased { .. }))
            .count();
        assert_eq!(released, 1);

        let outcome = complete(&scheduler, &mut ctx, "sign_off").await.unwrap();
        assert!(matches!(outcome, RunOutcome::Finished));
    }

    #[tokio::test]
    async fn test_branch_ending_early_does_not_block_join() {
        let yaml = r#"
key: early_end
nodes:
  - { kind: Start, id: start }
  - { kind: ParallelGateway, id: split, direction: Diverging }
  - { kind: UserTask, id: work }
  - { kind: ExclusiveGateway, id: check }
  - { kind: End, id: skipped }
  - { kind: ParallelGateway, id: merge, direction: Converging }
  - { kind: End, id: end }
edges:
  - { from: start, to: split }
  - { from: split, to: work }
  - { from: split, to: check }
  - from: check
    to: merge
    condition: { var: needed, op: "==", value: true }
  - { from: check, to: skipped, is_default: true }
  - { from: work, to: merge }
  - { from: merge, to: end }
"#;
        let scheduler = Scheduler::new(Arc::new(ServiceRegistry::new()), 100);
        let def = definition(yaml);
        let mut ctx = context(&def, Variables::new());

        start(&scheduler, &mut ctx).await.unwrap();
        assert_eq!(ctx.instance.tokens.len(), 1);
        let scope = ctx.instance.forks.values().next().unwrap();
        assert_eq!(scope.outstanding, 1);

        let outcome = complete(&scheduler, &mut ctx, "work").await.unwrap();
        assert!(matches!(outcome, RunOutcome::Finished));
    }

    #[tokio::test]
    async fn test_no_matching_transition_fails_instance() {
        let yaml = r#"
key: strict
nodes:
  - { kind: Start, id: start }
  - { kind: ExclusiveGateway, id: gw }
  - { kind: End, id: yes }
edges:
  - { from: start, to: gw }
  - from: gw
    to: yes
    condition: { var: ok, op: "==", value: true }
"#;
        let scheduler = Scheduler::new(Arc::new(ServiceRegistry::new()), 100);
        let def = definition(yaml);
        let mut ctx = context(&def, Variables::new());

        match start(&scheduler, &mut ctx).await.unwrap() {
            RunOutcome::Failed(record) => {
                assert_eq!(record.kind, FailureKind::NoMatchingTransition);
                assert_eq!(record.activity_id, "gw");
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(ctx.instance.tokens.is_empty());
        assert_eq!(ctx.instance.status, InstanceStatus::FinishedWithError);
    }

    #[tokio::test]
    async fn test_service_task_writes_instance_scope() {
        let yaml = r#"
key: svc
nodes:
  - { kind: Start, id: start }
  - { kind: ServiceTask, id: call, handler: echo }
  - { kind: ServiceTask, id: boom, handler: broken }
  - { kind: End, id: end }
  - { kind: ExclusiveGateway, id: gw }
edges:
  - { from: start, to: call }
  - { from: call, to: gw }
  - from: gw
    to: boom
    condition: { var: explode, op: "==", value: true }
  - { from: gw, to: end, is_default: true }
  - { from: boom, to: end }
"#;
        let services = Arc::new(ServiceRegistry::new());
        services.register(
            "echo",
            Arc::new(|ctx: &ServiceContext| -> anyhow::Result<Variables> {
                let text = ctx.variables.get("text").and_then(Value::as_str).unwrap_or("");
                Ok(Variables::from([(
                    "result".to_string(),
                    Value::from(format!("Processed: {}", text)),
                )]))
            }) as Arc<dyn ServiceHandler>,
        );
        services.register(
            "broken",
            Arc::new(|_: &ServiceContext| -> anyhow::Result<Variables> {
                Err(anyhow!("upstream unavailable"))
            }) as Arc<dyn ServiceHandler>,
        );
        let scheduler = Scheduler::new(services, 100);
        let def = definition(yaml);

        let mut ctx = context(
            &def,
            Variables::from([("text".to_string(), Value::from("hello"))]),
        );
        assert!(matches!(start(&scheduler, &mut ctx).await.unwrap(), RunOutcome::Finished));
        assert_eq!(
            ctx.instance.variables.get("result"),
            Some(&Value::from("Processed: hello"))
        );

        let mut ctx = context(
            &def,
            Variables::from([("explode".to_string(), Value::Bool(true))]),
        );
        match start(&scheduler, &mut ctx).await.unwrap() {
            RunOutcome::Failed(record) => {
                assert_eq!(record.kind, FailureKind::ServiceTaskFailed);
                assert_eq!(record.activity_id, "boom");
                assert!(record.message.contains("upstream unavailable"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cycle_hits_step_limit() {
        let yaml = r#"
key: spin
nodes:
  - { kind: Start, id: start }
  - { kind: ExclusiveGateway, id: a }
  - { kind: ExclusiveGateway, id: b }
  - { kind: End, id: end }
edges:
  - { from: start, to: a }
  - { from: a, to: b }
  - from: b
    to: end
    condition: { var: stop, op: "==", value: true }
  - { from: b, to: a, is_default: true }
"#;
        let scheduler = Scheduler::new(Arc::new(ServiceRegistry::new()), 50);
        let def = definition(yaml);
        let mut ctx = context(&def, Variables::new());
        assert!(matches!(
            start(&scheduler, &mut ctx).await,
            Err(EngineError::StepLimitExceeded { limit: 50, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_stops_between_entries() {
        let scheduler = Scheduler::new(Arc::new(ServiceRegistry::new()), 100);
        let def = definition(FORK_JOIN);
        let mut ctx = context(&def, Variables::new());
        let entry = scheduler.seed(&mut ctx);

        let outcome = scheduler
            .run(&mut ctx, entry, &AtomicBool::new(true))
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Interrupted { pending: 1 }));
        assert_eq!(ctx.instance.tokens.len(), 1);
        assert!(ctx.tasks.is_empty());
    }
}
