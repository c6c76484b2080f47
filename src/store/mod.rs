//! Event Log Store: append-only node/result/queue logs plus a
//! whole-document run record, all reconstructible from disk.

pub mod jsonl;
pub mod layout;
pub mod node;
pub mod queue;
pub mod result;
pub mod run;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{Error, Result};

pub use layout::{sanitize_for_filename, RunLayout};
pub use node::{Budgets, Decision, Domain, Node, NodeError, NodeMetrics, NodeStatus, ScopeRef, ScopeType};
pub use queue::{QueueEvent, QueueEventKind};
pub use result::{NodeResult, ResultArtifact, ResultStatus};
pub use run::{Checkpoint, OutputEntry, Progress, Run, RunConfig, RunMode, RunStatus, SchedulerMode};

/// Filesystem-backed store for one run directory root.
///
/// All reads reconstruct state by folding the relevant JSONL log; the store
/// holds no long-lived cache, so two `Store` handles over the same directory
/// (e.g. across a process restart) always agree.
#[derive(Debug, Clone)]
pub struct Store {
    base: PathBuf,
    run_id: String,
    layout: RunLayout,
}

impl Store {
    pub fn new(base: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        let base = base.into();
        let run_id = run_id.into();
        let layout = RunLayout::new(&base, &run_id);
        Self { base, run_id, layout }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Create the run directory tree and persist the initial `Run` document.
    pub fn init_run(&self, run: &Run) -> Result<()> {
        std::fs::create_dir_all(self.layout.artifacts_dir())?;
        std::fs::create_dir_all(self.layout.logs_dir())?;
        jsonl::write_whole(&self.layout.run_json(), run)
    }

    pub fn get_run(&self) -> Result<Run> {
        jsonl::read_whole(&self.layout.run_json())?
            .ok_or_else(|| Error::RunNotFound(self.run_id.clone()))
    }

    pub fn set_run(&self, run: &Run) -> Result<()> {
        jsonl::write_whole(&self.layout.run_json(), run)
    }

    pub fn append_node(&self, node: &Node) -> Result<()> {
        jsonl::append_line(&self.layout.nodes_jsonl(), node)
    }

    /// Fold `nodes.jsonl` into the latest snapshot per `node_id`, preserving
    /// insertion (i.e. `created_at`) order of first appearance.
    pub fn all_nodes(&self) -> Result<Vec<Node>> {
        let records: Vec<Node> = jsonl::read_all(&self.layout.nodes_jsonl())?;
        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, Node> = HashMap::new();
        for node in records {
            if !latest.contains_key(&node.node_id) {
                order.push(node.node_id.clone());
            }
            latest.insert(node.node_id.clone(), node);
        }
        Ok(order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect())
    }

    pub fn get_node(&self, node_id: &str) -> Result<Node> {
        self.all_nodes()?
            .into_iter()
            .find(|n| n.node_id == node_id)
            .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))
    }

    pub fn append_result(&self, result: &NodeResult) -> Result<()> {
        jsonl::append_line(&self.layout.results_jsonl(), result)
    }

    pub fn all_results(&self) -> Result<Vec<NodeResult>> {
        jsonl::read_all(&self.layout.results_jsonl())
    }

    pub fn get_result(&self, node_id: &str) -> Result<Option<NodeResult>> {
        Ok(self
            .all_results()?
            .into_iter()
            .find(|r| r.node_id == node_id))
    }

    pub fn append_queue_event(&self, event: &QueueEvent) -> Result<()> {
        jsonl::append_line(&self.layout.queue_jsonl(), event)
    }

    pub fn all_queue_events(&self) -> Result<Vec<QueueEvent>> {
        jsonl::read_all(&self.layout.queue_jsonl())
    }

    /// Recompute `Progress` from the current node snapshots and persist it
    /// onto the run document.
    pub fn refresh_progress(&self) -> Result<Run> {
        let nodes = self.all_nodes()?;
        let mut progress = Progress::default();
        progress.nodes_total = nodes.len() as u64;
        for node in &nodes {
            progress.max_depth_seen = progress.max_depth_seen.max(node.depth);
            match node.status {
                NodeStatus::Completed => progress.nodes_completed += 1,
                NodeStatus::Failed => progress.nodes_failed += 1,
                NodeStatus::Queued | NodeStatus::Running => progress.active_nodes += 1,
                NodeStatus::Cancelled => {}
            }
        }

        let mut run = self.get_run()?;
        run.progress = progress;
        run.checkpoint.last_event_offset = self.all_queue_events()?.len() as u64;
        run.checkpoint.updated_at = Utc::now();
        run.updated_at = Utc::now();
        self.set_run(&run)?;
        Ok(run)
    }

    /// Merge newly produced artifacts into the run's `output_index`.
    pub fn register_outputs(&self, entries: impl IntoIterator<Item = OutputEntry>) -> Result<Run> {
        let mut run = self.get_run()?;
        run.merge_output_index(entries);
        run.updated_at = Utc::now();
        self.set_run(&run)?;
        Ok(run)
    }

    pub fn set_status(&self, status: RunStatus) -> Result<Run> {
        let mut run = self.get_run()?;
        if run.status.is_terminal() {
            return Err(Error::invalid_transition(format!(
                "run {} is already {:?}, cannot transition to {:?}",
                self.run_id, run.status, status
            )));
        }
        run.status = status;
        run.updated_at = Utc::now();
        if status.is_terminal() {
            run.completed_at = Some(run.updated_at);
        }
        self.set_run(&run)?;
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use node::{Budgets, ScopeRef, ScopeType};
    use tempfile::tempdir;

    fn sample_run(root_node_id: &str) -> Run {
        let now = Utc::now();
        Run {
            run_id: "run-1".into(),
            objective: "audit the repo".into(),
            mode: RunMode::Generic,
            status: RunStatus::Running,
            root_node_id: root_node_id.into(),
            config: RunConfig::default(),
            progress: Progress::default(),
            output_index: Vec::new(),
            checkpoint: Checkpoint::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn sample_node(node_id: &str, status: NodeStatus, depth: u32) -> Node {
        let mut node = Node::new_queued(
            "run-1",
            node_id,
            None,
            depth,
            ScopeType::Repo,
            ScopeRef { paths: vec![".".into()] },
            "audit the repo",
            None,
            Budgets {
                max_depth: 4,
                remaining_llm_calls: 300,
                remaining_tokens: 500_000,
                deadline_epoch_ms: 0,
            },
        );
        node.status = status;
        node
    }

    #[test]
    fn init_and_get_run_roundtrips() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path(), "run-1");
        store.init_run(&sample_run("node-0")).unwrap();

        let run = store.get_run().unwrap();
        assert_eq!(run.run_id, "run-1");
        assert_eq!(run.root_node_id, "node-0");
    }

    #[test]
    fn all_nodes_keeps_latest_snapshot_per_id() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path(), "run-1");
        store.init_run(&sample_run("node-0")).unwrap();

        store.append_node(&sample_node("node-0", NodeStatus::Queued, 0)).unwrap();
        store.append_node(&sample_node("node-1", NodeStatus::Queued, 1)).unwrap();
        store.append_node(&sample_node("node-0", NodeStatus::Completed, 0)).unwrap();

        let nodes = store.all_nodes().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].node_id, "node-0");
        assert_eq!(nodes[0].status, NodeStatus::Completed);
        assert_eq!(nodes[1].node_id, "node-1");
    }

    #[test]
    fn refresh_progress_counts_by_status() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path(), "run-1");
        store.init_run(&sample_run("node-0")).unwrap();

        store.append_node(&sample_node("node-0", NodeStatus::Completed, 0)).unwrap();
        store.append_node(&sample_node("node-1", NodeStatus::Failed, 1)).unwrap();
        store.append_node(&sample_node("node-2", NodeStatus::Running, 1)).unwrap();

        let run = store.refresh_progress().unwrap();
        assert_eq!(run.progress.nodes_total, 3);
        assert_eq!(run.progress.nodes_completed, 1);
        assert_eq!(run.progress.nodes_failed, 1);
        assert_eq!(run.progress.active_nodes, 1);
        assert_eq!(run.progress.max_depth_seen, 1);
    }

    #[test]
    fn set_status_rejects_transition_once_terminal() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path(), "run-1");
        store.init_run(&sample_run("node-0")).unwrap();

        store.set_status(RunStatus::Completed).unwrap();
        let err = store.set_status(RunStatus::Cancelled).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition(_)));
    }
}
