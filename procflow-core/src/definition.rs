//! Executable process definitions.
//!
//! A `ProcessDefinition` is built once from a validated DTO and never changes;
//! the registry hands it out behind an `Arc`.

use crate::authoring::{validate_dto, NodeDto, ProcessDefinitionDto};
pub use crate::authoring::GatewayDirection;
use crate::condition::Condition;
use crate::error::{EngineError, EngineResult};
use crate::variables::ScopeChain;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ActivityKind {
    Start,
    UserTask {
        assignee: Option<String>,
        candidate_groups: BTreeSet<String>,
    },
    ServiceTask {
        handler: String,
    },
    ExclusiveGateway,
    ParallelGateway {
        direction: GatewayDirection,
    },
    End,
}

#[derive(Clone, Debug, Serialize)]
pub struct Activity {
    pub id: String,
    pub name: Option<String>,
    pub kind: ActivityKind,
}

impl Activity {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl From<&NodeDto> for Activity {
    fn from(node: &NodeDto) -> Self {
        let (name, kind) = match node {
            NodeDto::Start { name, .. } => (name, ActivityKind::Start),
            NodeDto::End { name, .. } => (name, ActivityKind::End),
            NodeDto::UserTask {
                name,
                assignee,
                candidate_groups,
                ..
            } => (
                name,
                ActivityKind::UserTask {
                    assignee: assignee.clone(),
                    candidate_groups: candidate_groups.iter().cloned().collect(),
                },
            ),
            NodeDto::ServiceTask { name, handler, .. } => (
                name,
                ActivityKind::ServiceTask {
                    handler: handler.clone(),
                },
            ),
            NodeDto::ExclusiveGateway { name, .. } => (name, ActivityKind::ExclusiveGateway),
            NodeDto::ParallelGateway {
                name, direction, ..
            } => (
                name,
                ActivityKind::ParallelGateway {
                    direction: *direction,
                },
            ),
        };
        Activity {
            id: node.id().to_string(),
            name: name.clone(),
            kind,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Transition {
    pub id: String,
    pub from: String,
    pub to: String,
    pub condition: Option<Condition>,
    pub is_default: bool,
}

impl Transition {
    /// Unconditional and default transitions are always eligible.
    pub fn is_enabled(&self, scope: &ScopeChain<'_>) -> bool {
        self.condition.as_ref().is_none_or(|c| c.evaluate(scope))
    }
}

#[derive(Debug, Serialize)]
pub struct ProcessDefinition {
    pub key: String,
    pub version: u32,
    pub name: Option<String>,
    /// SHA-256 of the canonical JSON of the source DTO.
    pub content_hash: [u8; 32],
    activities: Vec<Activity>,
    transitions: Vec<Transition>,
    #[serde(skip)]
    activity_index: HashMap<String, usize>,
    #[serde(skip)]
    outgoing: HashMap<String, Vec<usize>>,
    start_id: String,
}

impl ProcessDefinition {
    /// Validate `dto` and build version `version` of it.
    pub fn from_dto(dto: &ProcessDefinitionDto, version: u32) -> EngineResult<Self> {
        let errors = validate_dto(dto);
        if !errors.is_empty() {
            return Err(EngineError::InvalidDefinition {
                key: dto.key.clone(),
                errors: errors.iter().map(ToString::to_string).collect(),
            });
        }

        let canonical = serde_json::to_vec(dto).map_err(|e| EngineError::Internal(e.to_string()))?;
        let content_hash: [u8; 32] = Sha256::digest(&canonical).into();

        let activities: Vec<Activity> = dto.nodes.iter().map(Activity::from).collect();
        let activity_index = activities
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.clone(), i))
            .collect();

        let transitions: Vec<Transition> = dto
            .edges
            .iter()
            .map(|e| Transition {
                id: e.edge_id(),
                from: e.from.clone(),
                to: e.to.clone(),
                condition: e.condition.clone(),
                is_default: e.is_default,
            })
            .collect();
        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, t) in transitions.iter().enumerate() {
            outgoing.entry(t.from.clone()).or_default().push(i);
        }

        let start_id = activities
            .iter()
            .find(|a| a.kind == ActivityKind::Start)
            .map(|a| a.id.clone())
            .ok_or_else(|| EngineError::Internal("validated definition has no start".into()))?;

        Ok(Self {
            key: dto.key.clone(),
            version,
            name: dto.name.clone(),
            content_hash,
            activities,
            transitions,
            activity_index,
            outgoing,
            start_id,
        })
    }

    pub fn start_activity(&self) -> &str {
        &self.start_id
    }

    pub fn activity(&self, id: &str) -> Option<&Activity> {
        self.activity_index.get(id).map(|&i| &self.activities[i])
    }

    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Outgoing transitions in declaration order.
    pub fn outgoing(&self, activity_id: &str) -> impl Iterator<Item = &Transition> {
        self.outgoing
            .get(activity_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.transitions[i])
    }

    /// Pick the transition a single token leaves `activity_id` by: the first
    /// conditional transition that holds, else the unconditional/default one.
    pub fn select_transition(
        &self,
        activity_id: &str,
        scope: &ScopeChain<'_>,
    ) -> Option<&Transition> {
        self.outgoing(activity_id)
            .find(|t| t.condition.as_ref().is_some_and(|c| c.evaluate(scope)))
            .or_else(|| self.outgoing(activity_id).find(|t| t.condition.is_none()))
    }

    /// Whether a branch of the fork at `fork_id` reaches the converging
    /// gateway `join_id` without passing `avoiding` or another converging
    /// gateway.
    pub fn converges_at(&self, fork_id: &str, join_id: &str, avoiding: &str) -> bool {
        let mut seen: HashSet<&str> = HashSet::from([fork_id, avoiding]);
        let mut queue: VecDeque<&str> = self.outgoing(fork_id).map(|t| t.to.as_str()).collect();
        while let Some(id) = queue.pop_front() {
            if id == join_id {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            let converging = self.activity(id).is_some_and(|a| {
                a.kind
                    == ActivityKind::ParallelGateway {
                        direction: GatewayDirection::Converging,
                    }
            });
            if !converging {
                queue.extend(self.outgoing(id).map(|t| t.to.as_str()));
            }
        }
        false
    }

    pub fn content_hash_hex(&self) -> String {
        hex::encode(self.content_hash)
    }
}
