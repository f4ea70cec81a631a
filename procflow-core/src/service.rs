//! Service-task delegates.
//!
//! A service task names a handler; when a token reaches it the handler runs
//! inside the advance, under the instance lock, and its returned variables are
//! written at instance scope.

use crate::types::Variables;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// What a handler sees: a snapshot of the instance variables.
#[derive(Clone, Debug)]
pub struct ServiceContext {
    pub instance_id: Uuid,
    pub activity_id: String,
    pub variables: Variables,
}

#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// Returns the variables to write back. An error finishes the instance
    /// with `ServiceTaskFailed`.
    async fn execute(&self, ctx: &ServiceContext) -> Result<Variables>;
}

/// Plain closures work as handlers.
#[async_trait]
impl<F> ServiceHandler for F
where
    F: Fn(&ServiceContext) -> Result<Variables> + Send + Sync,
{
    async fn execute(&self, ctx: &ServiceContext) -> Result<Variables> {
        self(ctx)
    }
}

#[derive(Default)]
pub struct ServiceRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ServiceHandler>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any handler already registered under `name`.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn ServiceHandler>) {
        let name = name.into();
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if handlers.insert(name.clone(), handler).is_some() {
            tracing::debug!("ServiceRegistry: replaced handler {}", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ServiceHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[tokio::test]
    async fn test_closure_handler() {
        let registry = ServiceRegistry::new();
        registry.register(
            "echo",
            Arc::new(|ctx: &ServiceContext| -> Result<Variables> {
                let text = ctx
                    .variables
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(Variables::from([(
                    "result".to_string(),
                    Value::from(format!("Processed: {text}")),
                )]))
            }),
        );

        let handler = registry.get("echo").unwrap();
        let ctx = ServiceContext {
            instance_id: Uuid::now_v7(),
            activity_id: "call".into(),
            variables: Variables::from([("text".to_string(), Value::from("hi"))]),
        };
        let out = handler.execute(&ctx).await.unwrap();
        assert_eq!(out["result"], Value::from("Processed: hi"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }
}
