//! Variable scopes.
//!
//! The instance scope is the root of every chain. A task scope chains to its
//! instance: reads fall back to the instance, writes land wherever the caller
//! targets them (task-local by default).

use crate::types::{Value, Variables};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a write lands when issued through a task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    #[default]
    Local,
    Instance,
}

/// A flat name → value mapping owned by one instance or one task.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableScope {
    values: BTreeMap<String, Value>,
}

impl VariableScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Write a value, returning the one it replaced.
    pub fn set(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(name.into(), value)
    }

    /// Last write wins for every name in `incoming`.
    pub fn merge(&mut self, incoming: &Variables) {
        for (name, value) in incoming {
            self.values.insert(name.clone(), value.clone());
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Owned copy of the current values.
    pub fn snapshot(&self) -> Variables {
        self.values.clone()
    }
}

impl From<Variables> for VariableScope {
    fn from(values: Variables) -> Self {
        Self { values }
    }
}

/// Read view over a (task → instance) chain.
#[derive(Clone, Copy, Debug)]
pub struct ScopeChain<'a> {
    local: Option<&'a VariableScope>,
    root: &'a VariableScope,
}

impl<'a> ScopeChain<'a> {
    /// Chain rooted at an instance scope with no local layer.
    pub fn instance(root: &'a VariableScope) -> Self {
        Self { local: None, root }
    }

    pub fn task(local: &'a VariableScope, root: &'a VariableScope) -> Self {
        Self {
            local: Some(local),
            root,
        }
    }

    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.local
            .and_then(|scope| scope.get(name))
            .or_else(|| self.root.get(name))
    }

    /// Flattened view: the root overlaid with the local layer.
    pub fn resolved(&self) -> Variables {
        let mut out = self.root.snapshot();
        if let Some(local) = self.local {
            out.extend(local.snapshot());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_lookup_falls_back_to_instance() {
        let mut instance = VariableScope::new();
        instance.set("customer", Value::from("acme"));
        instance.set("amount", Value::Int(10));

        let mut task = VariableScope::new();
        task.set("amount", Value::Int(20));

        let chain = ScopeChain::task(&task, &instance);
        assert_eq!(chain.get("amount"), Some(&Value::Int(20)));
        assert_eq!(chain.get("customer"), Some(&Value::from("acme")));
        assert_eq!(chain.get("missing"), None);

        let resolved = chain.resolved();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved["amount"], Value::Int(20));
    }

    #[test]
    fn test_last_write_wins() {
        let mut scope = VariableScope::new();
        assert_eq!(scope.set("x", Value::Int(1)), None);
        assert_eq!(scope.set("x", Value::Int(2)), Some(Value::Int(1)));

        let incoming = Variables::from([("x".to_string(), Value::Bool(true))]);
        scope.merge(&incoming);
        assert_eq!(scope.get("x"), Some(&Value::Bool(true)));
        assert_eq!(scope.len(), 1);
    }

    #[test]
    fn test_scope_serializes_as_plain_map() {
        let mut scope = VariableScope::new();
        scope.set("approved", Value::Bool(true));
        let json = serde_json::to_string(&scope).unwrap();
        assert_eq!(json, r#"{"approved":true}"#);
    }
}
