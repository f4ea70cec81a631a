use crate::authoring::{parse_definition_yaml, ProcessDefinitionDto};
use crate::definition::ProcessDefinition;
use crate::error::{EngineError, EngineResult};
use anyhow::anyhow;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Versioned store of immutable process definitions.
///
/// Registering a key again never touches the earlier definition: it creates
/// the next version. Lookups without a version resolve to the latest one.
pub struct DefinitionRegistry {
    inner: RwLock<HashMap<String, BTreeMap<u32, Arc<ProcessDefinition>>>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Validate and register `dto` as the next version of its key.
    pub fn register(&self, dto: &ProcessDefinitionDto) -> EngineResult<Arc<ProcessDefinition>> {
        let mut store = self
            .inner
            .write()
            .map_err(|e| EngineError::Store(anyhow!("Lock: {}", e)))?;
        let versions = store.entry(dto.key.clone()).or_default();
        let next = versions.keys().next_back().map_or(1, |v| v + 1);

        let definition = match ProcessDefinition::from_dto(dto, next) {
            Ok(def) => Arc::new(def),
            Err(e) => {
                tracing::warn!("DefinitionRegistry: rejected {}: {}", dto.key, e);
                if versions.is_empty() {
                    store.remove(&dto.key);
                }
                return Err(e);
            }
        };

        versions.insert(next, definition.clone());
        tracing::info!(
            "DefinitionRegistry: registered {} v{} ({} activities, hash {})",
            definition.key,
            definition.version,
            definition.activities().len(),
            &definition.content_hash_hex()[..12],
        );
        Ok(definition)
    }

    pub fn register_yaml(&self, yaml: &str) -> EngineResult<Arc<ProcessDefinition>> {
        let dto = parse_definition_yaml(yaml).map_err(|e| match e.downcast::<serde_yaml::Error>() {
            Ok(yaml_err) => EngineError::Parse(yaml_err),
            Err(other) => EngineError::Store(other),
        })?;
        self.register(&dto)
    }

    /// Latest version when `version` is `None`.
    pub fn lookup(&self, key: &str, version: Option<u32>) -> EngineResult<Arc<ProcessDefinition>> {
        let store = self
            .inner
            .read()
            .map_err(|e| EngineError::Store(anyhow!("Lock: {}", e)))?;
        let not_found = || EngineError::DefinitionNotFound {
            key: key.to_string(),
            version,
        };
        let versions = store.get(key).ok_or_else(not_found)?;
        let found = match version {
            Some(v) => versions.get(&v),
            None => versions.values().next_back(),
        };
        found.cloned().ok_or_else(not_found)
    }

    /// All registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let store = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = store.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn versions(&self, key: &str) -> Vec<u32> {
        let store = self.inner.read().unwrap_or_else(|e| e.into_inner());
        store
            .get(key)
            .map(|v| v.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
