use crate::events::RuntimeEvent;
use crate::store::{Changeset, ProcessStore};
use crate::types::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    running: HashMap<Uuid, ProcessInstance>,
    /// Append order is preserved; `history_index` points into it.
    history: Vec<HistoricInstance>,
    history_index: HashMap<Uuid, usize>,
    tasks: HashMap<Uuid, Task>,
    events: HashMap<Uuid, Vec<RuntimeEvent>>,
}

/// In-memory ProcessStore for tests, the CLI and embedding.
///
/// A single `RwLock` guards all maps so a changeset becomes visible in one
/// step; reads clone out snapshots and never block on engine locks.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessStore for MemoryStore {
    async fn apply(&self, changes: Changeset) -> Result<()> {
        let mut store = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let id = changes.instance_id;

        // Validate before touching anything
        if changes.archive.is_some() && store.history_index.contains_key(&id) {
            return Err(anyhow!(
                "history is append-only: instance {} already archived",
                id
            ));
        }

        if let Some(historic) = changes.archive {
            store.running.remove(&id);
            let pos = store.history.len();
            store.history.push(historic);
            store.history_index.insert(id, pos);
        } else if let Some(instance) = changes.instance {
            store.running.insert(id, instance);
        }

        for task in changes.tasks {
            store.tasks.insert(task.task_id, task);
        }

        if !changes.events.is_empty() {
            store.events.entry(id).or_default().extend(changes.events);
        }
        Ok(())
    }

    async fn load_instance(&self, id: Uuid) -> Result<Option<ProcessInstance>> {
        let store = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(store.running.get(&id).cloned())
    }

    async fn list_running(&self) -> Result<Vec<ProcessInstance>> {
        let store = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut out: Vec<ProcessInstance> = store.running.values().cloned().collect();
        out.sort_by_key(|i| i.instance_id);
        Ok(out)
    }

    async fn load_history(&self, id: Uuid) -> Result<Option<HistoricInstance>> {
        let store = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(store
            .history_index
            .get(&id)
            .map(|&pos| store.history[pos].clone()))
    }

    async fn list_history(&self) -> Result<Vec<HistoricInstance>> {
        let store = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(store.history.clone())
    }

    async fn load_task(&self, id: Uuid) -> Result<Option<Task>> {
        let store = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(store.tasks.get(&id).cloned())
    }

    async fn query_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        let store = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut out: Vec<Task> = store
            .tasks
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.task_id);
        Ok(out)
    }

    async fn tasks_for_instance(&self, instance_id: Uuid) -> Result<Vec<Task>> {
        let store = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut out: Vec<Task> = store
            .tasks
            .values()
            .filter(|t| t.instance_id == instance_id)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.task_id);
        Ok(out)
    }

    async fn read_events(
        &self,
        instance_id: Uuid,
        from_seq: u64,
    ) -> Result<Vec<(u64, RuntimeEvent)>> {
        let store = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(store
            .events
            .get(&instance_id)
            .map(|events| {
                events
                    .iter()
                    .enumerate()
                    .map(|(i, e)| (i as u64 + 1, e.clone()))
                    .filter(|(seq, _)| *seq >= from_seq)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::VariableScope;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn make_instance() -> ProcessInstance {
        ProcessInstance {
            instance_id: Uuid::now_v7(),
            definition_key: "test".to_string(),
            definition_version: 1,
            status: InstanceStatus::Active,
            variables: VariableScope::new(),
            tokens: BTreeMap::new(),
            forks: BTreeMap::new(),
            started_at: Utc::now(),
        }
    }

    fn make_task(instance_id: Uuid) -> Task {
        Task {
            task_id: Uuid::now_v7(),
            instance_id,
            activity_id: "review".to_string(),
            token_id: Uuid::now_v7(),
            name: "review".to_string(),
            assignee: None,
            candidate_groups: ["reviewers".to_string()].into(),
            status: TaskStatus::Open,
            variables: VariableScope::new(),
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    #[tokio::test]
    async fn test_changeset_upserts_running_instance_and_tasks() {
        let store = MemoryStore::new();
        let instance = make_instance();
        let id = instance.instance_id;
        let task = make_task(id);

        let mut changes = Changeset::new(id);
        changes.instance = Some(instance);
        changes.tasks.push(task.clone());
        changes.events.push(RuntimeEvent::Suspended);
        changes.events.push(RuntimeEvent::Resumed);
        store.apply(changes).await.unwrap();

        assert!(store.load_instance(id).await.unwrap().is_some());
        assert_eq!(store.list_running().await.unwrap().len(), 1);
        assert_eq!(
            store
                .query_tasks(&TaskQuery::all().candidate_group("reviewers"))
                .await
                .unwrap()
                .len(),
            1
        );

        let events = store.read_events(id, 2).await.unwrap();
        assert_eq!(events, vec![(2, RuntimeEvent::Resumed)]);
    }

    #[tokio::test]
    async fn test_archive_moves_to_history_once() {
        let store = MemoryStore::new();
        let mut instance = make_instance();
        let id = instance.instance_id;

        let mut changes = Changeset::new(id);
        changes.instance = Some(instance.clone());
        store.apply(changes).await.unwrap();

        instance.status = InstanceStatus::Finished;
        let mut changes = Changeset::new(id);
        changes.archive = Some(HistoricInstance::from_instance(&instance, None, None));
        store.apply(changes.clone()).await.unwrap();

        assert!(store.load_instance(id).await.unwrap().is_none());
        let historic = store.load_history(id).await.unwrap().unwrap();
        assert_eq!(historic.status, InstanceStatus::Finished);

        // Append-only: a second archive of the same id is refused
        assert!(store.apply(changes).await.is_err());
        assert_eq!(store.list_history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_completed_tasks_leave_active_queries() {
        let store = MemoryStore::new();
        let id = Uuid::now_v7();
        let mut task = make_task(id);

        let mut changes = Changeset::new(id);
        changes.tasks.push(task.clone());
        store.apply(changes).await.unwrap();

        task.status = TaskStatus::Completed;
        let mut changes = Changeset::new(id);
        changes.tasks.push(task.clone());
        store.apply(changes).await.unwrap();

        assert!(store.query_tasks(&TaskQuery::all()).await.unwrap().is_empty());
        assert_eq!(store.tasks_for_instance(id).await.unwrap().len(), 1);
        assert_eq!(
            store.load_task(task.task_id).await.unwrap().unwrap().status,
            TaskStatus::Completed
        );
    }
}
