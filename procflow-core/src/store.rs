use crate::events::RuntimeEvent;
use crate::types::*;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Everything one engine operation writes, applied atomically.
///
/// Readers observe either none or all of a changeset.
#[derive(Debug, Clone)]
pub struct Changeset {
    pub instance_id: Uuid,
    /// Upsert into the running set.
    pub instance: Option<ProcessInstance>,
    /// Move the instance from the running set into history.
    pub archive: Option<HistoricInstance>,
    /// Upserted tasks.
    pub tasks: Vec<Task>,
    pub events: Vec<RuntimeEvent>,
}

impl Changeset {
    pub fn new(instance_id: Uuid) -> Self {
        Self {
            instance_id,
            instance: None,
            archive: None,
            tasks: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instance.is_none()
            && self.archive.is_none()
            && self.tasks.is_empty()
            && self.events.is_empty()
    }
}

/// Persistence trait for all engine state.
///
/// The engine operates exclusively through this trait; `MemoryStore` is the
/// in-process backend. Running instances live in a fast-access set, finished
/// and deleted ones in an append-only history that is never rewritten.
#[async_trait]
pub trait ProcessStore: Send + Sync {
    // ── Writes ──

    /// Apply a changeset. Archiving an id already in history is an error.
    async fn apply(&self, changes: Changeset) -> Result<()>;

    // ── Running instances ──

    async fn load_instance(&self, id: Uuid) -> Result<Option<ProcessInstance>>;
    async fn list_running(&self) -> Result<Vec<ProcessInstance>>;

    // ── History (append-only) ──

    async fn load_history(&self, id: Uuid) -> Result<Option<HistoricInstance>>;
    async fn list_history(&self) -> Result<Vec<HistoricInstance>>;

    // ── Tasks ──

    async fn load_task(&self, id: Uuid) -> Result<Option<Task>>;
    /// Open tasks matching `query`.
    async fn query_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>>;
    /// Every task of an instance, whatever its status.
    async fn tasks_for_instance(&self, instance_id: Uuid) -> Result<Vec<Task>>;

    // ── Event log ──

    async fn read_events(&self, instance_id: Uuid, from_seq: u64)
        -> Result<Vec<(u64, RuntimeEvent)>>;
}
