//! Queue events: the scheduler's append-only activity log.
//!
//! `queue.jsonl` is the audit trail of scheduler transitions; it is not
//! itself the scheduler's working queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventKind {
    NodeEnqueued,
    NodeDequeued,
    NodeStarted,
    NodeSplit,
    NodeAggregated,
    NodeCompleted,
    NodeFailed,
    NodeRequeued,
    RunCancelled,
    RunResumed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    pub run_id: String,
    pub event: QueueEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl QueueEvent {
    pub fn new(run_id: impl Into<String>, event: QueueEventKind, node_id: Option<String>) -> Self {
        Self {
            run_id: run_id.into(),
            event,
            node_id,
            timestamp: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}
