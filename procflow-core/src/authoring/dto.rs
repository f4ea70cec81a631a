use crate::condition::Condition;
use serde::{Deserialize, Serialize};

fn is_false(v: &bool) -> bool {
    !v
}

// ── Top-level DTO ──

/// Authoring form of a process definition, as written in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDefinitionDto {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub nodes: Vec<NodeDto>,
    pub edges: Vec<EdgeDto>,
}

// ── Edge ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDto {
    /// Defaults to `<from>-><to>` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_default: bool,
}

impl EdgeDto {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: None,
            from: from.into(),
            to: to.into(),
            condition: None,
            is_default: false,
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn default_flow(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn edge_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}->{}", self.from, self.to))
    }
}

// ── Node (tagged enum) ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayDirection {
    Diverging,
    Converging,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum NodeDto {
    Start {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    End {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    UserTask {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Static user id, or `${var}` resolved against the instance scope.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assignee: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        candidate_groups: Vec<String>,
    },
    ServiceTask {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        handler: String,
    },
    ExclusiveGateway {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    ParallelGateway {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        direction: GatewayDirection,
    },
}

impl NodeDto {
    pub fn id(&self) -> &str {
        match self {
            NodeDto::Start { id, .. }
            | NodeDto::End { id, .. }
            | NodeDto::UserTask { id, .. }
            | NodeDto::ServiceTask { id, .. }
            | NodeDto::ExclusiveGateway { id, .. }
            | NodeDto::ParallelGateway { id, .. } => id,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, NodeDto::Start { .. })
    }

    pub fn is_end(&self) -> bool {
        matches!(self, NodeDto::End { .. })
    }

    /// Nodes allowed to leave along several unconditional edges at once.
    pub fn is_fork(&self) -> bool {
        matches!(
            self,
            NodeDto::ParallelGateway {
                direction: GatewayDirection::Diverging,
                ..
            }
        )
    }
}
