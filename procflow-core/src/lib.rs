//! Process-instance execution engine.
//!
//! Definitions are authored as YAML graphs of activities and transitions,
//! validated and registered under a key with monotonic versions. Instances
//! run as tokens over the graph: user tasks park a token until the task is
//! completed, parallel gateways fork and join, exclusive gateways route on
//! instance variables, service tasks call registered handlers.
//!
//! # Example
//!
//! ```yaml
//! key: reviewProcess
//! nodes:
//!   - { kind: Start, id: start }
//!   - { kind: UserTask, id: review, candidate_groups: [reviewers] }
//!   - { kind: End, id: end }
//! edges:
//!   - { from: start, to: review }
//!   - { from: review, to: end }
//! ```

pub mod authoring;
pub mod condition;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod events;
pub mod locks;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod store_memory;
pub mod tasks;
pub mod types;
pub mod variables;

pub use condition::{CompareOp, Condition};
pub use config::EngineConfig;
pub use definition::{Activity, ActivityKind, GatewayDirection, ProcessDefinition, Transition};
pub use engine::ProcessEngine;
pub use error::{EngineError, EngineResult};
pub use events::RuntimeEvent;
pub use service::{ServiceContext, ServiceHandler, ServiceRegistry};
pub use store::{Changeset, ProcessStore};
pub use store_memory::MemoryStore;
pub use types::{
    FailureKind, FailureRecord, HistoricInstance, InstanceStatus, InstanceView, ProcessInstance,
    Task, TaskQuery, TaskStatus, Token, TokenState, Value, Variables,
};
pub use variables::{ScopeChain, ScopeLevel, VariableScope};
