//! Recursive Scheduler: single-threaded cooperative driver over one
//! run's event log — selects the next queued node, decides leaf vs split,
//! executes or enqueues children, and aggregates completed splits upward.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use crate::decision::{self, Decision as DecisionChoice};
use crate::error::{Error, Result};
use crate::leaf;
use crate::split;
use crate::store::{
    Decision, Node, NodeError, NodeMetrics, NodeResult, NodeStatus, OutputEntry, QueueEvent,
    QueueEventKind, ResultStatus, RunStatus, SchedulerMode, Store,
};

/// Sample cap used when the decision engine walks a node's scope; the
/// decision only needs `file_count`/`total_bytes`, which [`crate::scope::walk_scope`]
/// accumulates independent of this cap.
const DECISION_SAMPLE_FILES: usize = 200;

/// Result of driving the scheduler for one or more node iterations.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub processed_nodes: u64,
    pub aggregated_nodes: u64,
    pub notes: Vec<String>,
}

pub struct Scheduler<'a> {
    store: &'a Store,
}

impl<'a> Scheduler<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Repeats the aggregate/select/transition/decide/execute cycle
    /// up to `max_nodes` times, then do one trailing aggregation pass and
    /// refresh derived run state.
    pub fn step(&self, max_nodes: u64) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for _ in 0..max_nodes {
            outcome.aggregated_nodes += self.aggregate_pending()?;

            let Some(node) = self.select_next()? else {
                break;
            };
            self.run_one(node, &mut outcome)?;
            outcome.processed_nodes += 1;
        }

        outcome.aggregated_nodes += self.aggregate_pending()?;
        self.store.refresh_progress()?;
        self.refresh_output_index()?;
        self.refresh_terminal_state()?;
        Ok(outcome)
    }

    /// Merges every result's artifacts into `run.output_index`, deduped on
    /// `(kind, path)`. Results accumulate monotonically, so this is a pure
    /// union each pass rather than a per-node diff.
    fn refresh_output_index(&self) -> Result<()> {
        let entries = self.store.all_results()?.into_iter().flat_map(|result| {
            result
                .artifacts
                .into_iter()
                .map(|artifact| OutputEntry { kind: artifact.kind, path: artifact.path })
        });
        self.store.register_outputs(entries)?;
        Ok(())
    }

    /// Calls `step(1)` repeatedly until the run terminalizes or an
    /// iteration is idle (processed nothing and aggregated nothing),
    /// bounded overall by `max_nodes`.
    pub fn run_until(&self, max_nodes: u64) -> Result<BatchOutcome> {
        let mut total = BatchOutcome::default();

        for _ in 0..max_nodes {
            let batch = self.step(1)?;
            total.processed_nodes += batch.processed_nodes;
            total.aggregated_nodes += batch.aggregated_nodes;
            total.notes.extend(batch.notes);

            let run = self.store.get_run()?;
            if run.status.is_terminal() {
                break;
            }
            if batch.processed_nodes == 0 && batch.aggregated_nodes == 0 {
                break;
            }
        }

        Ok(total)
    }

    fn select_next(&self) -> Result<Option<Node>> {
        let run = self.store.get_run()?;
        let mut queued: Vec<Node> = self
            .store
            .all_nodes()?
            .into_iter()
            .filter(|n| n.status == NodeStatus::Queued)
            .collect();

        match run.config.scheduler {
            SchedulerMode::Dfs => {
                queued.sort_by(|a, b| b.depth.cmp(&a.depth).then(a.created_at.cmp(&b.created_at)));
            }
            // `hybrid` is intentionally identical to `bfs` in this
            // implementation — both prefer minimum depth, earliest created_at.
            SchedulerMode::Bfs | SchedulerMode::Hybrid => {
                queued.sort_by(|a, b| a.depth.cmp(&b.depth).then(a.created_at.cmp(&b.created_at)));
            }
        }

        Ok(queued.into_iter().next())
    }

    fn run_one(&self, mut node: Node, outcome: &mut BatchOutcome) -> Result<()> {
        let run = self.store.get_run()?;

        node.status = NodeStatus::Running;
        node = node.touch();
        self.store.append_node(&node)?;
        self.emit(QueueEventKind::NodeDequeued, Some(&node.node_id))?;
        self.emit(QueueEventKind::NodeStarted, Some(&node.node_id))?;

        let decided = decision::decide(&node, run.mode, decision::now_epoch_ms(), DECISION_SAMPLE_FILES);

        match decided.decision {
            DecisionChoice::Split => self.handle_split(node, decided, outcome)?,
            DecisionChoice::Leaf => self.handle_leaf(node, decided, run.mode)?,
        }

        Ok(())
    }

    fn handle_split(&self, mut node: Node, decided: decision::DecisionOutcome, outcome: &mut BatchOutcome) -> Result<()> {
        let children = split::plan_children(&node);

        if children.is_empty() {
            // Split failure falls back to a leaf with a
            // lower confidence, still driven through the normal leaf path.
            outcome.notes.push(format!(
                "node {} had no splittable children; falling back to leaf",
                node.node_id
            ));
            let run = self.store.get_run()?;
            self.execute_as_leaf(
                node,
                decided.metrics,
                run.mode,
                "split_no_children_fallback_leaf",
                0.75,
            )?;
            return Ok(());
        }

        let started = Instant::now();
        let mut child_ids = Vec::with_capacity(children.len());
        for planned in children {
            let child = Node::new_queued(
                &node.run_id,
                planned.node_id.clone(),
                Some(node.node_id.clone()),
                node.depth + 1,
                planned.scope_type,
                planned.scope_ref,
                node.objective.clone(),
                node.domain,
                planned.budgets,
            );
            self.store.append_node(&child)?;
            self.emit(QueueEventKind::NodeEnqueued, Some(&child.node_id))?;
            child_ids.push(child.node_id);
        }

        node.decision = Decision::Split;
        node.decision_reason = Some(decided.reason.as_str().to_string());
        node.child_ids = child_ids;
        node.metrics = Some(NodeMetrics {
            file_count: decided.metrics.file_count,
            total_bytes: decided.metrics.total_bytes,
            duration_ms: Some(started.elapsed().as_millis() as u64),
            findings_count: None,
        });
        // The split parent is NOT terminalized here: it
        // stays `running` until every child terminalizes and aggregation runs.
        node = node.touch();
        self.store.append_node(&node)?;
        self.emit(QueueEventKind::NodeSplit, Some(&node.node_id))?;

        Ok(())
    }

    fn handle_leaf(&self, node: Node, decided: decision::DecisionOutcome, mode: crate::store::RunMode) -> Result<()> {
        self.execute_as_leaf(node, decided.metrics, mode, decided.reason.as_str(), 0.8)
    }

    fn execute_as_leaf(
        &self,
        mut node: Node,
        metrics: crate::scope::ScopeMetrics,
        mode: crate::store::RunMode,
        decision_reason: &str,
        confidence: f64,
    ) -> Result<()> {
        let layout = self.store.layout().clone();
        let started = Instant::now();

        let outcome = catch_unwind(AssertUnwindSafe(|| leaf::execute_leaf(&node, mode, &layout)));
        let duration_ms = started.elapsed().as_millis() as u64;

        node.decision = Decision::Leaf;
        node.decision_reason = Some(decision_reason.to_string());
        node.metrics = Some(NodeMetrics {
            file_count: metrics.file_count,
            total_bytes: metrics.total_bytes,
            duration_ms: Some(duration_ms),
            findings_count: None,
        });

        match outcome {
            Ok(leaf_outcome) => {
                node.metrics.as_mut().unwrap().findings_count = Some(leaf_outcome.result.findings.len() as u64);
                node.status = NodeStatus::Completed;
                node.confidence = Some(confidence);
                node = node.touch();
                self.store.append_node(&node)?;
                self.store.append_result(&leaf_outcome.result)?;
                self.emit(QueueEventKind::NodeCompleted, Some(&node.node_id))?;
            }
            Err(panic) => {
                let message = panic_message(&panic);
                node.status = NodeStatus::Failed;
                node.confidence = Some(confidence.min(0.5));
                node.errors = vec![NodeError::execution_error(&message)];
                node = node.touch();
                self.store.append_node(&node)?;
                self.store
                    .append_result(&NodeResult::failed(&node.run_id, &node.node_id, message))?;
                self.emit(QueueEventKind::NodeFailed, Some(&node.node_id))?;
            }
        }

        Ok(())
    }

    /// Folds in the result of any split parent whose children
    /// are all terminal and which has no result yet.
    fn aggregate_pending(&self) -> Result<u64> {
        let nodes = self.store.all_nodes()?;
        let by_id: std::collections::HashMap<&str, &Node> =
            nodes.iter().map(|n| (n.node_id.as_str(), n)).collect();

        let mut aggregated = 0u64;

        for parent in &nodes {
            if parent.decision != Decision::Split || parent.child_ids.is_empty() {
                continue;
            }
            if self.store.get_result(&parent.node_id)?.is_some() {
                continue;
            }

            let children: Vec<&Node> = parent
                .child_ids
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).copied())
                .collect();
            if children.len() != parent.child_ids.len() {
                continue; // a child snapshot has not been observed yet
            }
            if !children.iter().all(|c| c.status.is_terminal()) {
                continue;
            }

            self.aggregate_one(parent, &children)?;
            aggregated += 1;
        }

        Ok(aggregated)
    }

    fn aggregate_one(&self, parent: &Node, children: &[&Node]) -> Result<()> {
        let mut summaries = Vec::new();
        let mut findings = Vec::new();
        let mut artifacts = Vec::new();
        let mut failed_children = 0usize;

        for child in children {
            match child.status {
                NodeStatus::Failed | NodeStatus::Cancelled => {
                    failed_children += 1;
                    summaries.push(format!("{}: {:?} (no result)", child.node_id, child.status));
                }
                _ => {
                    if let Some(result) = self.store.get_result(&child.node_id)? {
                        summaries.push(format!("{}: {}", child.node_id, result.summary));
                        findings.extend(result.findings);
                        artifacts.extend(result.artifacts);
                    } else {
                        failed_children += 1;
                        summaries.push(format!("{}: completed with no result", child.node_id));
                    }
                }
            }
        }

        let child_count = children.len();
        let status = if failed_children == child_count {
            ResultStatus::Failed
        } else if failed_children > 0 {
            ResultStatus::Partial
        } else {
            ResultStatus::Completed
        };

        let summary = format!(
            "Aggregated {} child nodes for {}:\n{}",
            child_count,
            parent.node_id,
            summaries.join("\n")
        );

        let mut result = NodeResult {
            run_id: parent.run_id.clone(),
            node_id: parent.node_id.clone(),
            status,
            summary,
            findings,
            artifacts,
            aggregation_notes: None,
            created_at: chrono::Utc::now(),
        };
        if status != ResultStatus::Completed {
            result.aggregation_notes = Some(format!(
                "{failed_children} of {child_count} child nodes did not complete successfully"
            ));
        }
        self.store.append_result(&result)?;

        let mut updated_parent = parent.clone();
        updated_parent.status = if status == ResultStatus::Failed {
            NodeStatus::Failed
        } else {
            NodeStatus::Completed
        };
        updated_parent.confidence = Some(match status {
            ResultStatus::Completed => 0.8,
            ResultStatus::Partial => 0.6,
            ResultStatus::Failed => 0.5,
        });
        updated_parent = updated_parent.touch();
        self.store.append_node(&updated_parent)?;
        self.emit(QueueEventKind::NodeAggregated, Some(&parent.node_id))?;

        Ok(())
    }

    /// After a batch, reflects the root node's terminal state onto
    /// the run, or fail the run if the queue has drained with a
    /// non-terminal root.
    fn refresh_terminal_state(&self) -> Result<()> {
        let run = self.store.get_run()?;
        if run.status.is_terminal() {
            return Ok(());
        }

        let nodes = self.store.all_nodes()?;
        let Some(root) = nodes.iter().find(|n| n.node_id == run.root_node_id) else {
            return Ok(());
        };

        let new_status = match root.status {
            NodeStatus::Completed => Some(RunStatus::Completed),
            NodeStatus::Failed => Some(RunStatus::Failed),
            NodeStatus::Cancelled => Some(RunStatus::Cancelled),
            NodeStatus::Queued | NodeStatus::Running => {
                let any_active = nodes
                    .iter()
                    .any(|n| matches!(n.status, NodeStatus::Queued | NodeStatus::Running));
                if any_active {
                    None
                } else {
                    Some(RunStatus::Failed)
                }
            }
        };

        if let Some(status) = new_status {
            self.store.set_status(status)?;
        }
        Ok(())
    }

    /// Cancel is legal only from non-terminal run states. Every
    /// `queued`/`running` node terminalizes to `cancelled`.
    pub fn cancel(&self) -> Result<()> {
        let run = self.store.get_run()?;
        if run.status.is_terminal() {
            return Err(Error::invalid_transition(format!(
                "run {} is already {:?}; cannot cancel",
                run.run_id, run.status
            )));
        }

        for mut node in self.store.all_nodes()? {
            if matches!(node.status, NodeStatus::Queued | NodeStatus::Running) {
                node.status = NodeStatus::Cancelled;
                node = node.touch();
                self.store.append_node(&node)?;
            }
        }

        self.store.set_status(RunStatus::Cancelled)?;
        self.emit(QueueEventKind::RunCancelled, None)?;
        Ok(())
    }

    /// Resume is legal from `cancelled`/`failed`/`running` (running is
    /// a no-op). Requeues every cancelled node that has no persisted result.
    pub fn resume(&self) -> Result<()> {
        let mut run = self.store.get_run()?;
        if run.status == RunStatus::Running {
            return Ok(());
        }
        if !matches!(run.status, RunStatus::Cancelled | RunStatus::Failed) {
            return Err(Error::invalid_transition(format!(
                "run {} is {:?}; resume requires cancelled, failed, or running",
                run.run_id, run.status
            )));
        }

        let mut requeued_any = false;
        for mut node in self.store.all_nodes()? {
            if node.status == NodeStatus::Cancelled && self.store.get_result(&node.node_id)?.is_none() {
                node.status = NodeStatus::Queued;
                node = node.touch();
                self.store.append_node(&node)?;
                self.emit(QueueEventKind::NodeRequeued, Some(&node.node_id))?;
                requeued_any = true;
            }
        }

        run.status = RunStatus::Running;
        run.completed_at = None;
        run.updated_at = chrono::Utc::now();
        self.store.set_run(&run)?;
        self.emit(QueueEventKind::RunResumed, None)?;

        let _ = requeued_any;
        Ok(())
    }

    fn emit(&self, kind: QueueEventKind, node_id: Option<&str>) -> Result<()> {
        let run_id = self.store.run_id().to_string();
        self.store
            .append_queue_event(&QueueEvent::new(run_id, kind, node_id.map(str::to_string)))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "leaf execution panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Budgets, Checkpoint, Progress, Run, RunConfig, RunMode, ScopeRef, ScopeType};
    use chrono::Utc;
    use std::fs;
    use tempfile::tempdir;

    fn init_run(store: &Store, root_dir: &std::path::Path, mode: RunMode, scheduler: SchedulerMode) {
        let now = Utc::now();
        let root_id = "run-1:root".to_string();
        let run = Run {
            run_id: "run-1".into(),
            objective: "audit".into(),
            mode,
            status: RunStatus::Running,
            root_node_id: root_id.clone(),
            config: RunConfig { scheduler, ..RunConfig::default() },
            progress: Progress::default(),
            output_index: Vec::new(),
            checkpoint: Checkpoint::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        store.init_run(&run).unwrap();

        let root = Node::new_queued(
            "run-1",
            root_id,
            None,
            0,
            ScopeType::Repo,
            ScopeRef { paths: vec![root_dir.to_string_lossy().to_string()] },
            "audit",
            None,
            Budgets {
                max_depth: 4,
                remaining_llm_calls: 300,
                remaining_tokens: 500_000,
                deadline_epoch_ms: i64::MAX,
            },
        );
        store.append_node(&root).unwrap();
    }

    #[test]
    fn tiny_repo_is_a_single_completed_leaf() {
        let src = tempdir().unwrap();
        fs::write(src.path().join("a.txt"), "hello").unwrap();
        fs::write(src.path().join("b.txt"), "world").unwrap();

        let run_base = tempdir().unwrap();
        let store = Store::new(run_base.path(), "run-1");
        init_run(&store, src.path(), RunMode::Generic, SchedulerMode::Bfs);

        let scheduler = Scheduler::new(&store);
        let outcome = scheduler.run_until(50).unwrap();
        assert_eq!(outcome.processed_nodes, 1);

        let run = store.get_run().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.progress.nodes_total, 1);

        let node = store.get_node("run-1:root").unwrap();
        assert_eq!(node.decision, Decision::Leaf);
        assert_eq!(node.decision_reason.as_deref(), Some("scope_small_enough"));
    }

    #[test]
    fn split_then_aggregate_completes_run() {
        let src = tempdir().unwrap();
        fs::create_dir(src.path().join("a")).unwrap();
        fs::create_dir(src.path().join("b")).unwrap();
        for dir in ["a", "b"] {
            for i in 0..20 {
                fs::write(src.path().join(dir).join(format!("f{i}.txt")), "x").unwrap();
            }
        }

        let run_base = tempdir().unwrap();
        let store = Store::new(run_base.path(), "run-1");
        init_run(&store, src.path(), RunMode::Review, SchedulerMode::Bfs);

        let scheduler = Scheduler::new(&store);
        scheduler.run_until(50).unwrap();

        let run = store.get_run().unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let root = store.get_node("run-1:root").unwrap();
        assert_eq!(root.decision, Decision::Split);
        assert_eq!(root.child_ids.len(), 2);

        let root_result = store.get_result("run-1:root").unwrap().unwrap();
        for child_id in &root.child_ids {
            assert!(root_result.summary.contains(child_id.as_str()));
        }
    }

    #[test]
    fn cancel_then_resume_drains_to_completion() {
        let src = tempdir().unwrap();
        fs::create_dir(src.path().join("a")).unwrap();
        fs::create_dir(src.path().join("b")).unwrap();
        for dir in ["a", "b"] {
            for i in 0..20 {
                fs::write(src.path().join(dir).join(format!("f{i}.txt")), "x").unwrap();
            }
        }

        let run_base = tempdir().unwrap();
        let store = Store::new(run_base.path(), "run-1");
        init_run(&store, src.path(), RunMode::Review, SchedulerMode::Bfs);

        let scheduler = Scheduler::new(&store);
        scheduler.step(1).unwrap(); // processes the root, splitting it
        scheduler.cancel().unwrap();

        let run = store.get_run().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        for node in store.all_nodes().unwrap() {
            assert!(!matches!(node.status, NodeStatus::Queued | NodeStatus::Running));
        }

        scheduler.resume().unwrap();
        let resumed = store.get_run().unwrap();
        assert_eq!(resumed.status, RunStatus::Running);

        scheduler.run_until(50).unwrap();
        let final_run = store.get_run().unwrap();
        assert_eq!(final_run.status, RunStatus::Completed);
    }

    #[test]
    fn step_merges_result_artifacts_into_output_index_without_synthesize() {
        let src = tempdir().unwrap();
        fs::write(src.path().join("a.txt"), "hello").unwrap();

        let run_base = tempdir().unwrap();
        let store = Store::new(run_base.path(), "run-1");
        init_run(&store, src.path(), RunMode::Wiki, SchedulerMode::Bfs);

        let scheduler = Scheduler::new(&store);
        scheduler.run_until(50).unwrap();

        let run = store.get_run().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(
            run.output_index.iter().any(|e| e.kind == "wiki_node"),
            "expected run.output_index to carry the leaf's wiki_node artifact \
             without a repo_rlm_synthesize call, got {:?}",
            run.output_index
        );
    }

    #[test]
    fn resume_on_running_run_is_a_no_op() {
        let src = tempdir().unwrap();
        fs::write(src.path().join("a.txt"), "x").unwrap();
        let run_base = tempdir().unwrap();
        let store = Store::new(run_base.path(), "run-1");
        init_run(&store, src.path(), RunMode::Generic, SchedulerMode::Bfs);

        let scheduler = Scheduler::new(&store);
        scheduler.resume().unwrap();
        assert_eq!(store.get_run().unwrap().status, RunStatus::Running);
    }
}
