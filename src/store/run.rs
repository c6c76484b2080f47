//! Run: the whole-document root record for one recursive analysis run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Analysis mode selected at `startRun`; drives decision thresholds
/// and which synthesis artifacts `auto` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Generic,
    Wiki,
    Review,
}

impl Default for RunMode {
    fn default() -> Self {
        Self::Generic
    }
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Node selection policy used by the scheduler. `Hybrid` is
/// intentionally identical to `Bfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    Bfs,
    Dfs,
    Hybrid,
}

impl Default for SchedulerMode {
    fn default() -> Self {
        Self::Bfs
    }
}

/// Per-run budgets and scheduling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub max_depth: u32,
    pub max_llm_calls: u32,
    pub max_tokens: u64,
    pub max_wall_clock_ms: u64,
    pub scheduler: SchedulerMode,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            max_llm_calls: 300,
            max_tokens: 500_000,
            max_wall_clock_ms: 1_800_000,
            scheduler: SchedulerMode::Bfs,
        }
    }
}

/// Derived progress counters; always recomputed from node snapshots, never
/// hand-mutated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub nodes_total: u64,
    pub nodes_completed: u64,
    pub nodes_failed: u64,
    pub active_nodes: u64,
    pub max_depth_seen: u32,
}

/// One entry in the run's artifact index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputEntry {
    pub kind: String,
    pub path: String,
}

/// Scheduler checkpoint: how many queue events have been observed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_event_offset: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self {
            last_event_offset: 0,
            updated_at: Utc::now(),
        }
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// The whole-document Run record persisted at `run.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub objective: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub root_node_id: String,
    pub config: RunConfig,
    pub progress: Progress,
    pub output_index: Vec<OutputEntry>,
    pub checkpoint: Checkpoint,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Merge `entries` into `output_index`, deduping on `(kind, path)` and
    /// sorting lexicographically by path.
    pub fn merge_output_index(&mut self, entries: impl IntoIterator<Item = OutputEntry>) {
        for entry in entries {
            if !self.output_index.contains(&entry) {
                self.output_index.push(entry);
            }
        }
        self.output_index.sort_by(|a, b| a.path.cmp(&b.path));
    }
}
