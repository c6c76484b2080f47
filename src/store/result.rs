//! Result: the output of a completed (or partially completed) node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::finding::Finding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Partial,
    Failed,
}

/// A synthesis-ready artifact produced by a node (a wiki page, a scan log,
/// etc). Distinct from `store::run::OutputEntry`: this is per-node, that is
/// the run-wide deduped index it feeds into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultArtifact {
    pub kind: String,
    pub path: String,
}

/// One append-only record in `results.jsonl`. Unlike nodes, results are
/// write-once: a node_id should appear at most once here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub run_id: String,
    pub node_id: String,
    pub status: ResultStatus,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ResultArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NodeResult {
    pub fn completed(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            node_id: node_id.into(),
            status: ResultStatus::Completed,
            summary: summary.into(),
            findings: Vec::new(),
            artifacts: Vec::new(),
            aggregation_notes: None,
            created_at: Utc::now(),
        }
    }

    pub fn failed(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            node_id: node_id.into(),
            status: ResultStatus::Failed,
            summary: summary.into(),
            findings: Vec::new(),
            artifacts: Vec::new(),
            aggregation_notes: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<ResultArtifact>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_aggregation_notes(mut self, notes: impl Into<String>) -> Self {
        self.aggregation_notes = Some(notes.into());
        self
    }
}
