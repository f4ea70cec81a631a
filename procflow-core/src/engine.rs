use crate::authoring::ProcessDefinitionDto;
use crate::config::EngineConfig;
use crate::definition::ProcessDefinition;
use crate::error::{EngineError, EngineResult};
use crate::events::RuntimeEvent;
use crate::locks::InstanceLocks;
use crate::registry::DefinitionRegistry;
use crate::scheduler::{self, ExecutionContext, RunOutcome, Scheduler};
use crate::service::{ServiceHandler, ServiceRegistry};
use crate::store::{Changeset, ProcessStore};
use crate::store_memory::MemoryStore;
use crate::tasks;
use crate::types::*;
use crate::variables::{ScopeChain, ScopeLevel};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// How a committed operation leaves the running set.
struct Archive {
    delete_reason: Option<String>,
    failure: Option<FailureRecord>,
}

/// The boundary API: process lifecycle, tasks, variables and queries.
///
/// Mutations of one instance are serialised on its lock and staged in an
/// `ExecutionContext`; the store sees a single changeset per operation.
/// Reads go straight to the store and take no instance lock.
pub struct ProcessEngine {
    store: Arc<dyn ProcessStore>,
    definitions: DefinitionRegistry,
    services: Arc<ServiceRegistry>,
    scheduler: Scheduler,
    locks: InstanceLocks,
    config: EngineConfig,
}

impl ProcessEngine {
    pub fn new(store: Arc<dyn ProcessStore>, config: EngineConfig) -> Self {
        let services = Arc::new(ServiceRegistry::new());
        Self {
            store,
            definitions: DefinitionRegistry::new(),
            scheduler: Scheduler::new(services.clone(), config.max_steps_per_run),
            services,
            locks: InstanceLocks::new(config.lock_timeout()),
            config,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.definitions
    }

    // ── Definitions & services ──

    pub fn deploy(&self, dto: &ProcessDefinitionDto) -> EngineResult<Arc<ProcessDefinition>> {
        self.definitions.register(dto)
    }

    pub fn deploy_yaml(&self, yaml: &str) -> EngineResult<Arc<ProcessDefinition>> {
        self.definitions.register_yaml(yaml)
    }

    pub fn register_service(&self, name: impl Into<String>, handler: Arc<dyn ServiceHandler>) {
        self.services.register(name, handler);
    }

    // ── Process lifecycle ──

    /// Start the latest version of `key` and run it until it stabilises.
    pub async fn start_process(&self, key: &str, variables: Variables) -> EngineResult<Uuid> {
        self.start_process_version(key, None, variables).await
    }

    pub async fn start_process_version(
        &self,
        key: &str,
        version: Option<u32>,
        variables: Variables,
    ) -> EngineResult<Uuid> {
        let definition = self.definitions.lookup(key, version)?;
        let instance = ProcessInstance::new(&definition, variables);
        let instance_id = instance.instance_id;
        let guard = self.locks.acquire(instance_id).await?;

        let mut ctx = ExecutionContext::new(instance, definition.clone());
        ctx.events.push(RuntimeEvent::InstanceStarted {
            definition_key: definition.key.clone(),
            definition_version: definition.version,
        });
        let entry = self.scheduler.seed(&mut ctx);
        let outcome = self
            .scheduler
            .run(&mut ctx, entry, guard.cancel_flag())
            .await?;

        tracing::info!(
            "ProcessEngine: started {} ({} v{})",
            instance_id,
            definition.key,
            definition.version
        );
        self.settle(ctx, outcome).await?;
        Ok(instance_id)
    }

    /// No-op on an instance that is already suspended.
    pub async fn suspend_process(&self, instance_id: Uuid) -> EngineResult<()> {
        self.set_status(instance_id, InstanceStatus::Suspended).await
    }

    /// No-op on an active instance. Nothing missed while suspended is replayed.
    pub async fn resume_process(&self, instance_id: Uuid) -> EngineResult<()> {
        self.set_status(instance_id, InstanceStatus::Active).await
    }

    async fn set_status(&self, instance_id: Uuid, status: InstanceStatus) -> EngineResult<()> {
        let _guard = self.locks.acquire(instance_id).await?;
        let mut instance = self.require_running(instance_id).await?;
        if instance.status == status {
            return Ok(());
        }
        instance.status = status;

        let mut changes = Changeset::new(instance_id);
        changes.instance = Some(instance);
        self.record(
            &mut changes,
            match status {
                InstanceStatus::Suspended => RuntimeEvent::Suspended,
                _ => RuntimeEvent::Resumed,
            },
        );
        self.store.apply(changes).await?;
        tracing::info!("ProcessEngine: {} is now {}", instance_id, status);
        Ok(())
    }

    /// Force-terminate a running or suspended instance.
    ///
    /// A run in flight on the instance is stopped at its next token boundary
    /// and committed before the instance is terminated.
    pub async fn delete_process(&self, instance_id: Uuid, reason: &str) -> EngineResult<()> {
        let guard = self.locks.acquire_for_cancel(instance_id).await;
        let result = self.delete_locked(instance_id, reason).await;
        // A failed delete must not leave later runs interrupted.
        guard.clear_cancel();
        result
    }

    async fn delete_locked(&self, instance_id: Uuid, reason: &str) -> EngineResult<()> {
        let instance = self
            .store
            .load_instance(instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))?;
        let definition = self.definition_of(&instance)?;

        let mut ctx = ExecutionContext::new(instance, definition);
        scheduler::terminate(&mut ctx);
        ctx.instance.status = InstanceStatus::Deleted;
        ctx.events.push(RuntimeEvent::Deleted {
            reason: reason.to_string(),
        });
        self.commit(
            ctx,
            Some(Archive {
                delete_reason: Some(reason.to_string()),
                failure: None,
            }),
        )
        .await?;
        tracing::info!("ProcessEngine: deleted {} ({})", instance_id, reason);
        Ok(())
    }

    // ── Tasks ──

    /// Complete an open task and advance its token.
    ///
    /// `variables` land in the task scope and flow on into the instance
    /// scope. If the advance fails nothing is persisted and the task stays
    /// open.
    pub async fn complete_task(&self, task_id: Uuid, variables: Variables) -> EngineResult<()> {
        let instance_id = self.require_task(task_id).await?.instance_id;
        let guard = self.locks.acquire(instance_id).await?;

        let mut task = self.require_task(task_id).await?;
        tasks::ensure_open(&task)?;
        let instance = self.require_active(instance_id).await?;
        let definition = self.definition_of(&instance)?;

        let mut ctx = ExecutionContext::new(instance, definition);
        task.variables.merge(&variables);
        ctx.instance.variables.merge(&variables);
        tasks::close(&mut task, TaskStatus::Completed);
        ctx.events.push(RuntimeEvent::TaskCompleted {
            task_id,
            variables: variables.keys().cloned().collect(),
        });
        let token_id = task.token_id;
        ctx.tasks.insert(task_id, task);

        let entry = self.scheduler.resume_parked(&mut ctx, token_id)?;
        let outcome = self
            .scheduler
            .run(&mut ctx, entry, guard.cancel_flag())
            .await?;
        tracing::debug!("ProcessEngine: completed task {} of {}", task_id, instance_id);
        self.settle(ctx, outcome).await
    }

    /// Idempotent for the current assignee; `AlreadyClaimed` for anyone else.
    pub async fn claim_task(&self, task_id: Uuid, user: &str) -> EngineResult<()> {
        self.update_task(task_id, |task| {
            Ok(tasks::claim(task, user)?.then(|| RuntimeEvent::TaskClaimed {
                task_id,
                user: user.to_string(),
            }))
        })
        .await
    }

    pub async fn unclaim_task(&self, task_id: Uuid) -> EngineResult<()> {
        self.update_task(task_id, |task| {
            let previous = tasks::unclaim(task)?;
            Ok(Some(RuntimeEvent::TaskUnclaimed { task_id, previous }))
        })
        .await
    }

    /// Administrative override of any current claim.
    pub async fn assign_task(&self, task_id: Uuid, user: &str) -> EngineResult<()> {
        self.update_task(task_id, |task| {
            let previous = tasks::assign(task, user)?;
            Ok(Some(RuntimeEvent::TaskAssigned {
                task_id,
                user: user.to_string(),
                previous,
            }))
        })
        .await
    }

    /// Apply `f` to an open task of an active instance. `f` returns the event
    /// to record, or `None` when it changed nothing.
    async fn update_task<F>(&self, task_id: Uuid, f: F) -> EngineResult<()>
    where
        F: FnOnce(&mut Task) -> EngineResult<Option<RuntimeEvent>>,
    {
        let instance_id = self.require_task(task_id).await?.instance_id;
        let _guard = self.locks.acquire(instance_id).await?;

        let mut task = self.require_task(task_id).await?;
        tasks::ensure_open(&task)?;
        self.require_active(instance_id).await?;

        let Some(event) = f(&mut task)? else {
            return Ok(());
        };
        let mut changes = Changeset::new(instance_id);
        changes.tasks.push(task);
        self.record(&mut changes, event);
        self.store.apply(changes).await?;
        Ok(())
    }

    /// Completed and cancelled tasks stay readable.
    pub async fn get_task(&self, task_id: Uuid) -> EngineResult<Task> {
        self.require_task(task_id).await
    }

    pub async fn list_active_tasks(&self, query: &TaskQuery) -> EngineResult<Vec<Task>> {
        Ok(self.store.query_tasks(query).await?)
    }

    pub async fn all_active_tasks(&self) -> EngineResult<Vec<Task>> {
        self.list_active_tasks(&TaskQuery::all()).await
    }

    pub async fn tasks_by_assignee(&self, user: &str) -> EngineResult<Vec<Task>> {
        self.list_active_tasks(&TaskQuery::all().assignee(user)).await
    }

    pub async fn tasks_by_candidate_group(&self, group: &str) -> EngineResult<Vec<Task>> {
        self.list_active_tasks(&TaskQuery::all().candidate_group(group))
            .await
    }

    /// Every task the instance ever had, whatever its status.
    pub async fn instance_tasks(&self, instance_id: Uuid) -> EngineResult<Vec<Task>> {
        Ok(self.store.tasks_for_instance(instance_id).await?)
    }

    // ── Variables ──

    /// Reads history once the instance has finished.
    pub async fn get_process_variables(&self, instance_id: Uuid) -> EngineResult<Variables> {
        Ok(self
            .get_process_instance(instance_id)
            .await?
            .variables()
            .snapshot())
    }

    pub async fn get_process_variable(
        &self,
        instance_id: Uuid,
        name: &str,
    ) -> EngineResult<Option<Value>> {
        Ok(self.get_process_variables(instance_id).await?.remove(name))
    }

    /// Allowed while suspended; history is read-only.
    pub async fn set_process_variable(
        &self,
        instance_id: Uuid,
        name: &str,
        value: Value,
    ) -> EngineResult<()> {
        let _guard = self.locks.acquire(instance_id).await?;
        let mut instance = self.require_running(instance_id).await?;
        instance.variables.set(name, value);

        let mut changes = Changeset::new(instance_id);
        changes.instance = Some(instance);
        self.record(
            &mut changes,
            RuntimeEvent::VariableSet {
                name: name.to_string(),
                task_id: None,
            },
        );
        self.store.apply(changes).await?;
        Ok(())
    }

    /// Task scope overlaid on the instance scope.
    pub async fn get_task_variables(&self, task_id: Uuid) -> EngineResult<Variables> {
        let task = self.require_task(task_id).await?;
        let instance = self.get_process_instance(task.instance_id).await?;
        Ok(ScopeChain::task(&task.variables, instance.variables()).resolved())
    }

    pub async fn get_task_variable(&self, task_id: Uuid, name: &str) -> EngineResult<Option<Value>> {
        let task = self.require_task(task_id).await?;
        let instance = self.get_process_instance(task.instance_id).await?;
        Ok(ScopeChain::task(&task.variables, instance.variables())
            .get(name)
            .cloned())
    }

    /// Write through a task, at task-local scope or on the owning instance.
    pub async fn set_task_variable(
        &self,
        task_id: Uuid,
        name: &str,
        value: Value,
        level: ScopeLevel,
    ) -> EngineResult<()> {
        let instance_id = self.require_task(task_id).await?.instance_id;
        let _guard = self.locks.acquire(instance_id).await?;

        let mut task = self.require_task(task_id).await?;
        tasks::ensure_open(&task)?;
        let mut instance = self.require_running(instance_id).await?;

        let mut changes = Changeset::new(instance_id);
        let scoped_to = match level {
            ScopeLevel::Local => {
                task.variables.set(name, value);
                changes.tasks.push(task);
                Some(task_id)
            }
            ScopeLevel::Instance => {
                instance.variables.set(name, value);
                changes.instance = Some(instance);
                None
            }
        };
        self.record(
            &mut changes,
            RuntimeEvent::VariableSet {
                name: name.to_string(),
                task_id: scoped_to,
            },
        );
        self.store.apply(changes).await?;
        Ok(())
    }

    // ── Instance queries ──

    pub async fn get_process_instance(&self, instance_id: Uuid) -> EngineResult<InstanceView> {
        if let Some(instance) = self.store.load_instance(instance_id).await? {
            return Ok(InstanceView::Running(instance));
        }
        self.store
            .load_history(instance_id)
            .await?
            .map(InstanceView::Historic)
            .ok_or(EngineError::InstanceNotFound(instance_id))
    }

    /// Active and suspended instances.
    pub async fn list_running_processes(&self) -> EngineResult<Vec<Uuid>> {
        Ok(self
            .store
            .list_running()
            .await?
            .into_iter()
            .map(|i| i.instance_id)
            .collect())
    }

    /// Everything in history: finished, failed and deleted, in archive order.
    pub async fn list_finished_processes(&self) -> EngineResult<Vec<Uuid>> {
        Ok(self
            .list_history()
            .await?
            .into_iter()
            .map(|h| h.instance_id)
            .collect())
    }

    pub async fn list_history(&self) -> EngineResult<Vec<HistoricInstance>> {
        Ok(self.store.list_history().await?)
    }

    pub async fn events(&self, instance_id: Uuid) -> EngineResult<Vec<(u64, RuntimeEvent)>> {
        self.events_since(instance_id, 1).await
    }

    pub async fn events_since(
        &self,
        instance_id: Uuid,
        from_seq: u64,
    ) -> EngineResult<Vec<(u64, RuntimeEvent)>> {
        Ok(self.store.read_events(instance_id, from_seq).await?)
    }

    // ── Internals ──

    async fn require_task(&self, task_id: Uuid) -> EngineResult<Task> {
        self.store
            .load_task(task_id)
            .await?
            .ok_or(EngineError::TaskNotFound(task_id))
    }

    async fn require_running(&self, instance_id: Uuid) -> EngineResult<ProcessInstance> {
        self.store
            .load_instance(instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))
    }

    async fn require_active(&self, instance_id: Uuid) -> EngineResult<ProcessInstance> {
        let instance = self.require_running(instance_id).await?;
        if instance.status == InstanceStatus::Suspended {
            tracing::warn!("ProcessEngine: refused operation on suspended {}", instance_id);
            return Err(EngineError::InstanceSuspended(instance_id));
        }
        Ok(instance)
    }

    fn definition_of(&self, instance: &ProcessInstance) -> EngineResult<Arc<ProcessDefinition>> {
        self.definitions
            .lookup(&instance.definition_key, Some(instance.definition_version))
    }

    fn record(&self, changes: &mut Changeset, event: RuntimeEvent) {
        if self.config.record_events {
            changes.events.push(event);
        }
    }

    /// Commit a finished run according to its outcome.
    async fn settle(&self, mut ctx: ExecutionContext, outcome: RunOutcome) -> EngineResult<()> {
        match outcome {
            RunOutcome::Stable | RunOutcome::Interrupted { .. } => self.commit(ctx, None).await,
            RunOutcome::Finished => {
                ctx.instance.status = InstanceStatus::Finished;
                ctx.events.push(RuntimeEvent::Completed { at: Utc::now() });
                tracing::info!("ProcessEngine: {} finished", ctx.instance.instance_id);
                self.commit(
                    ctx,
                    Some(Archive {
                        delete_reason: None,
                        failure: None,
                    }),
                )
                .await
            }
            RunOutcome::Failed(record) => {
                let err = EngineError::from_failure(ctx.instance.instance_id, &record);
                self.commit(
                    ctx,
                    Some(Archive {
                        delete_reason: None,
                        failure: Some(record),
                    }),
                )
                .await?;
                Err(err)
            }
        }
    }

    /// Write the staged context as one changeset. Archiving cancels every task
    /// of the instance that is still open.
    async fn commit(&self, mut ctx: ExecutionContext, archive: Option<Archive>) -> EngineResult<()> {
        let instance_id = ctx.instance.instance_id;
        let mut changes = Changeset::new(instance_id);

        match archive {
            Some(Archive {
                delete_reason,
                failure,
            }) => {
                for task in self.store.tasks_for_instance(instance_id).await? {
                    if task.is_open() {
                        ctx.tasks.entry(task.task_id).or_insert(task);
                    }
                }
                for task in ctx.tasks.values_mut().filter(|t| t.is_open()) {
                    tasks::close(task, TaskStatus::Cancelled);
                    ctx.events.push(RuntimeEvent::TaskCancelled {
                        task_id: task.task_id,
                    });
                }
                changes.archive = Some(HistoricInstance::from_instance(
                    &ctx.instance,
                    delete_reason,
                    failure,
                ));
            }
            None => changes.instance = Some(ctx.instance),
        }

        changes.tasks = ctx.tasks.into_values().collect();
        if self.config.record_events {
            changes.events = ctx.events;
        }
        self.store.apply(changes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    const REVIEW: &str = r#"
key: reviewProcess
nodes:
  - { kind: Start, id: start }
  - { kind: UserTask, id: review, name: review, candidate_groups: [reviewers] }
  - { kind: End, id: end }
edges:
  - { from: start, to: review }
  - { from: review, to: end }
"#;

    fn engine() -> ProcessEngine {
        let engine = ProcessEngine::in_memory();
        engine.deploy_yaml(REVIEW).unwrap();
        engine
    }

    async fn only_task(engine: &ProcessEngine, instance_id: Uuid) -> Task {
        let mut tasks = engine
            .list_active_tasks(&TaskQuery::all().instance(instance_id))
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        tasks.remove(0)
    }

    #[tokio::test]
    async fn test_unknown_definition() {
        let engine = engine();
        assert!(matches!(
            engine.start_process("nope", Variables::new()).await,
            Err(EngineError::DefinitionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_task_variables_chain_and_flow() {
        let engine = engine();
        let id = engine
            .start_process(
                "reviewProcess",
                Variables::from([("customer".to_string(), Value::from("acme"))]),
            )
            .await
            .unwrap();
        let task = only_task(&engine, id).await;

        engine
            .set_task_variable(task.task_id, "draft", Value::from("v1"), ScopeLevel::Local)
            .await
            .unwrap();
        engine
            .set_task_variable(task.task_id, "priority", Value::Int(2), ScopeLevel::Instance)
            .await
            .unwrap();

        let seen = engine.get_task_variables(task.task_id).await.unwrap();
        assert_eq!(seen["customer"], Value::from("acme"));
        assert_eq!(seen["draft"], Value::from("v1"));
        assert_eq!(seen["priority"], Value::Int(2));

        let instance_vars = engine.get_process_variables(id).await.unwrap();
        assert!(!instance_vars.contains_key("draft"));
        assert_eq!(instance_vars["priority"], Value::Int(2));

        engine
            .complete_task(
                task.task_id,
                Variables::from([("approved".to_string(), Value::Bool(true))]),
            )
            .await
            .unwrap();
        let history = engine.get_process_variables(id).await.unwrap();
        assert_eq!(history["approved"], Value::Bool(true));
        assert!(!history.contains_key("draft"));
        assert_eq!(
            engine.get_task_variable(task.task_id, "draft").await.unwrap(),
            Some(Value::from("v1"))
        );
    }

    #[tokio::test]
    async fn test_delete_cancels_open_tasks() {
        let engine = engine();
        let id = engine
            .start_process("reviewProcess", Variables::new())
            .await
            .unwrap();
        let task = only_task(&engine, id).await;

        engine.delete_process(id, "withdrawn").await.unwrap();

        match engine.get_process_instance(id).await.unwrap() {
            InstanceView::Historic(h) => {
                assert_eq!(h.status, InstanceStatus::Deleted);
                assert_eq!(h.delete_reason.as_deref(), Some("withdrawn"));
            }
            other => panic!("expected history, got {:?}", other),
        }
        assert_eq!(
            engine.get_task(task.task_id).await.unwrap().status,
            TaskStatus::Cancelled
        );
        assert!(engine.all_active_tasks().await.unwrap().is_empty());
        assert!(matches!(
            engine.delete_process(id, "again").await,
            Err(EngineError::InstanceNotFound(_))
        ));
        assert!(matches!(
            engine.set_process_variable(id, "x", Value::Int(1)).await,
            Err(EngineError::InstanceNotFound(_))
        ));
    }

    /// Delegates to `MemoryStore`; refuses archives while `refuse_archive` is set.
    struct ArchiveRefusingStore {
        inner: MemoryStore,
        refuse_archive: AtomicBool,
    }

    #[async_trait]
    impl ProcessStore for ArchiveRefusingStore {
        async fn apply(&self, changes: Changeset) -> anyhow::Result<()> {
            if changes.archive.is_some() && self.refuse_archive.load(Ordering::Acquire) {
                anyhow::bail!("history unavailable");
            }
            self.inner.apply(changes).await
        }

        async fn load_instance(&self, id: Uuid) -> anyhow::Result<Option<ProcessInstance>> {
            self.inner.load_instance(id).await
        }

        async fn list_running(&self) -> anyhow::Result<Vec<ProcessInstance>> {
            self.inner.list_running().await
        }

        async fn load_history(&self, id: Uuid) -> anyhow::Result<Option<HistoricInstance>> {
            self.inner.load_history(id).await
        }

        async fn list_history(&self) -> anyhow::Result<Vec<HistoricInstance>> {
            self.inner.list_history().await
        }

        async fn load_task(&self, id: Uuid) -> anyhow::Result<Option<Task>> {
            self.inner.load_task(id).await
        }

        async fn query_tasks(&self, query: &TaskQuery) -> anyhow::Result<Vec<Task>> {
            self.inner.query_tasks(query).await
        }

        async fn tasks_for_instance(&self, instance_id: Uuid) -> anyhow::Result<Vec<Task>> {
            self.inner.tasks_for_instance(instance_id).await
        }

        async fn read_events(
            &self,
            instance_id: Uuid,
            from_seq: u64,
        ) -> anyhow::Result<Vec<(u64, RuntimeEvent)>> {
            self.inner.read_events(instance_id, from_seq).await
        }
    }

    #[tokio::test]
    async fn test_failed_delete_does_not_interrupt_later_runs() {
        let store = Arc::new(ArchiveRefusingStore {
            inner: MemoryStore::new(),
            refuse_archive: AtomicBool::new(true),
        });
        let engine = ProcessEngine::new(store.clone(), EngineConfig::default());
        engine.deploy_yaml(REVIEW).unwrap();
        let id = engine
            .start_process("reviewProcess", Variables::new())
            .await
            .unwrap();
        let task = only_task(&engine, id).await;

        assert!(matches!(
            engine.delete_process(id, "withdrawn").await,
            Err(EngineError::Store(_))
        ));
        assert!(matches!(
            engine.get_process_instance(id).await.unwrap(),
            InstanceView::Running(_)
        ));

        store.refuse_archive.store(false, Ordering::Release);
        engine
            .complete_task(task.task_id, Variables::new())
            .await
            .unwrap();
        assert_eq!(
            engine.get_process_instance(id).await.unwrap().status(),
            InstanceStatus::Finished
        );
        assert!(engine.locks.is_empty());
    }

    #[tokio::test]
    async fn test_failed_operations_leave_no_lock_slots() {
        let engine = engine();
        for _ in 0..100 {
            let unknown = Uuid::now_v7();
            assert!(engine.delete_process(unknown, "gone").await.is_err());
            assert!(engine
                .set_process_variable(unknown, "x", Value::Int(1))
                .await
                .is_err());
            assert!(engine.suspend_process(unknown).await.is_err());
        }
        assert!(engine.locks.is_empty());

        let id = engine
            .start_process("reviewProcess", Variables::new())
            .await
            .unwrap();
        let task = only_task(&engine, id).await;
        engine
            .complete_task(task.task_id, Variables::new())
            .await
            .unwrap();
        assert!(matches!(
            engine.complete_task(task.task_id, Variables::new()).await,
            Err(EngineError::TaskAlreadyCompleted(_))
        ));
        assert!(matches!(
            engine.claim_task(task.task_id, "bob").await,
            Err(EngineError::TaskAlreadyCompleted(_) | EngineError::InstanceNotFound(_))
        ));
        assert!(engine.locks.is_empty());
    }

    #[tokio::test]
    async fn test_events_disabled() {
        let engine = ProcessEngine::new(
            Arc::new(MemoryStore::new()),
            EngineConfig {
                record_events: false,
                ..EngineConfig::default()
            },
        );
        engine.deploy_yaml(REVIEW).unwrap();
        let id = engine
            .start_process("reviewProcess", Variables::new())
            .await
            .unwrap();
        assert!(engine.events(id).await.unwrap().is_empty());
    }
}
