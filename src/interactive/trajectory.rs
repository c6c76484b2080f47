//! Trajectory and call-tree bookkeeping for the interactive engine.
//!
//! A [`Trajectory`] is the ordered record of one controller run: one
//! [`TrajectoryStep`] per loop iteration, each carrying the sub-calls it
//! spawned. [`CallTree`] is the live, mutable counterpart an observer polls
//! while the loop is still running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Kind of sub-call a controller iteration made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubCallType {
    LlmQuery,
    RlmQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubCallStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One entry on the live call tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: SubCallType,
    /// First 200 characters of the prompt, never the full text.
    pub prompt: String,
    pub model: Option<String>,
    pub status: SubCallStatus,
    pub start_time_epoch_ms: u64,
    pub duration_ms: Option<u64>,
    pub result: Option<String>,
    pub error: Option<String>,
}

const PROMPT_PREVIEW_CHARS: usize = 200;

impl SubCall {
    pub fn start(id: impl Into<String>, call_type: SubCallType, prompt: &str, model: Option<String>) -> Self {
        Self {
            id: id.into(),
            call_type,
            prompt: prompt.chars().take(PROMPT_PREVIEW_CHARS).collect(),
            model,
            status: SubCallStatus::Running,
            start_time_epoch_ms: now_epoch_ms(),
            duration_ms: None,
            result: None,
            error: None,
        }
    }

    pub fn complete(&mut self, result: String) {
        self.status = SubCallStatus::Completed;
        self.duration_ms = Some(now_epoch_ms().saturating_sub(self.start_time_epoch_ms));
        self.result = Some(result);
    }

    pub fn fail(&mut self, error: String) {
        self.status = SubCallStatus::Failed;
        self.duration_ms = Some(now_epoch_ms().saturating_sub(self.start_time_epoch_ms));
        self.error = Some(error);
    }
}

pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One loop iteration of the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryStep {
    pub iteration: u32,
    pub depth: u32,
    pub reasoning: String,
    pub code: Option<String>,
    pub output: String,
    #[serde(default)]
    pub sub_calls: Vec<SubCall>,
}

/// The full record of a controller run, in iteration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trajectory {
    pub steps: Vec<TrajectoryStep>,
}

impl Trajectory {
    pub fn push(&mut self, step: TrajectoryStep) {
        self.steps.push(step);
    }

    /// Render a bounded text summary of prior iterations for the next
    /// prompt's "trajectory so far" section.
    pub fn render_summary(&self, max_steps: usize) -> String {
        let mut out = String::new();
        for step in self.steps.iter().rev().take(max_steps).collect::<Vec<_>>().into_iter().rev() {
            out.push_str(&format!("--- iteration {} ---\n", step.iteration));
            if !step.reasoning.is_empty() {
                out.push_str(&step.reasoning);
                out.push('\n');
            }
            if let Some(code) = &step.code {
                out.push_str("code:\n");
                out.push_str(code);
                out.push('\n');
            }
            out.push_str("output:\n");
            out.push_str(&step.output);
            out.push('\n');
        }
        out
    }
}

/// Live view of an in-progress (or completed) controller run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallTree {
    pub root_query: String,
    pub iterations: u32,
    pub total_llm_calls: u64,
    pub total_rlm_calls: u64,
    pub max_depth: u32,
    pub active_calls: u32,
    pub completed_calls: u32,
}

impl CallTree {
    pub fn new(root_query: impl Into<String>, max_depth: u32) -> Self {
        Self {
            root_query: root_query.into(),
            iterations: 0,
            total_llm_calls: 0,
            total_rlm_calls: 0,
            max_depth,
            active_calls: 0,
            completed_calls: 0,
        }
    }
}

/// Shared, atomically-updated LLM call budget.
///
/// Cloning shares the same counter — every clone (root controller, every
/// recursive child) observes and contributes to the same total.
#[derive(Debug, Clone)]
pub struct SharedBudget {
    used: Arc<AtomicU64>,
    limit: u64,
}

impl SharedBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            used: Arc::new(AtomicU64::new(0)),
            limit,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used())
    }

    /// Atomically claims one call against the budget. Returns `false` (and
    /// leaves the counter untouched) if the budget is already exhausted.
    pub fn try_claim(&self) -> bool {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                if used < self.limit {
                    Some(used + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }
}
