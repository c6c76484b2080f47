//! Node: a scoped unit of work within a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Repo,
    Dir,
    Module,
    FileGroup,
    FileSlice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Security,
    Quality,
    Performance,
    Docs,
    Architecture,
}

impl Domain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Quality => "quality",
            Self::Performance => "performance",
            Self::Docs => "docs",
            Self::Architecture => "architecture",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Undecided,
    Leaf,
    Split,
}

/// A scoped list of filesystem paths a node is responsible for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRef {
    pub paths: Vec<String>,
}

/// Remaining resource allotment for a node and its descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budgets {
    pub max_depth: u32,
    pub remaining_llm_calls: i64,
    pub remaining_tokens: i64,
    pub deadline_epoch_ms: i64,
}

impl Budgets {
    pub fn is_llm_exhausted(&self) -> bool {
        self.remaining_llm_calls <= 0
    }

    pub fn is_token_exhausted(&self) -> bool {
        self.remaining_tokens <= 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub file_count: u64,
    pub total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub findings_count: Option<u64>,
}

/// A structured execution failure recorded on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl NodeError {
    pub fn execution_error(message: impl Into<String>) -> Self {
        Self {
            code: "node_execution_error".to_string(),
            message: message.into(),
            retryable: false,
        }
    }
}

/// One snapshot of a node's state. The log of these is keyed-latest-wins
/// reduced by `node_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub run_id: String,
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub depth: u32,
    pub scope_type: ScopeType,
    pub scope_ref: ScopeRef,
    pub objective: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    pub status: NodeStatus,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
    pub child_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub budgets: Budgets,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<NodeMetrics>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<NodeError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn new_queued(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        parent_id: Option<String>,
        depth: u32,
        scope_type: ScopeType,
        scope_ref: ScopeRef,
        objective: impl Into<String>,
        domain: Option<Domain>,
        budgets: Budgets,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            node_id: node_id.into(),
            parent_id,
            depth,
            scope_type,
            scope_ref,
            objective: objective.into(),
            domain,
            status: NodeStatus::Queued,
            decision: Decision::Undecided,
            decision_reason: None,
            child_ids: Vec::new(),
            confidence: None,
            budgets,
            metrics: None,
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Produce the next snapshot of this node with `updated_at` refreshed.
    /// The store is append-only; mutation always means "append a new
    /// snapshot", never "edit in place".
    pub fn touch(mut self) -> Self {
        self.updated_at = Utc::now();
        self
    }
}
