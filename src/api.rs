//! Tool surface consumed by an external agent host: plain, directly
//! callable async functions wrapping a `Store`/`Scheduler`/`Controller`
//! handle. A host agent (out of scope here) registers these as callable
//! tools under whatever schema its own tool-calling convention expects;
//! this module only exposes the functions themselves.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::decision;
use crate::error::Result;
use crate::interactive::{resolve_context, Controller, ControllerConfig, InterpreterConfig};
use crate::llm::LLMClient;
use crate::scheduler::{BatchOutcome, Scheduler};
use crate::store::{
    Budgets, Checkpoint, Node, NodeStatus, Progress, QueueEvent, Run, RunConfig, RunMode,
    RunStatus, SchedulerMode, ScopeRef, ScopeType, Store,
};
use crate::synthesis::{self, SynthesisOutcome, Target};

/// Field-by-field overrides accepted by [`repo_rlm_start`]; any field left
/// `None` falls back to [`RunConfig::default`].
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub mode: Option<RunMode>,
    pub max_depth: Option<u32>,
    pub max_llm_calls: Option<u32>,
    pub max_tokens: Option<u64>,
    pub max_wall_clock_ms: Option<u64>,
    pub scheduler: Option<SchedulerMode>,
}

/// Creates a new run rooted at `scope_path`, persists its initial `Run` and
/// root `Node`, and returns the freshly initialized `Run`.
pub fn repo_rlm_start(
    base: impl Into<PathBuf>,
    scope_path: impl Into<PathBuf>,
    objective: &str,
    options: StartOptions,
) -> Result<Run> {
    let run_id = Uuid::new_v4().to_string();
    let store = Store::new(base, &run_id);

    let mut config = RunConfig::default();
    if let Some(v) = options.max_depth {
        config.max_depth = v;
    }
    if let Some(v) = options.max_llm_calls {
        config.max_llm_calls = v;
    }
    if let Some(v) = options.max_tokens {
        config.max_tokens = v;
    }
    if let Some(v) = options.max_wall_clock_ms {
        config.max_wall_clock_ms = v;
    }
    if let Some(v) = options.scheduler {
        config.scheduler = v;
    }
    let mode = options.mode.unwrap_or_default();

    let root_node_id = format!("{run_id}:root");
    let deadline_epoch_ms = decision::now_epoch_ms() + config.max_wall_clock_ms as i64;
    let scope_path = scope_path.into();

    let root = Node::new_queued(
        &run_id,
        &root_node_id,
        None,
        0,
        ScopeType::Repo,
        ScopeRef { paths: vec![scope_path.to_string_lossy().to_string()] },
        objective,
        None,
        Budgets {
            max_depth: config.max_depth,
            remaining_llm_calls: config.max_llm_calls as i64,
            remaining_tokens: config.max_tokens as i64,
            deadline_epoch_ms,
        },
    );

    let now = chrono::Utc::now();
    let run = Run {
        run_id: run_id.clone(),
        objective: objective.to_string(),
        mode,
        status: RunStatus::Running,
        root_node_id,
        config,
        progress: Progress::default(),
        output_index: Vec::new(),
        checkpoint: Checkpoint::new(),
        created_at: now,
        updated_at: now,
        completed_at: None,
    };

    store.init_run(&run)?;
    store.append_node(&root)?;
    store.refresh_progress()
}

/// Drives at most `max_nodes` scheduler iterations and returns the refreshed
/// `Run` alongside what happened.
pub fn repo_rlm_step(base: impl Into<PathBuf>, run_id: &str, max_nodes: u64) -> Result<(Run, BatchOutcome)> {
    let store = Store::new(base, run_id);
    let scheduler = Scheduler::new(&store);
    let outcome = scheduler.step(max_nodes.max(1))?;
    let run = store.get_run()?;
    Ok((run, outcome))
}

/// Drives the scheduler to completion or idleness, bounded by `max_nodes`
/// (default 200 at the call site, per the tool surface's documented
/// default).
pub fn repo_rlm_run(base: impl Into<PathBuf>, run_id: &str, max_nodes: u64) -> Result<(Run, BatchOutcome)> {
    let store = Store::new(base, run_id);
    let scheduler = Scheduler::new(&store);
    let outcome = scheduler.run_until(max_nodes)?;
    let run = store.get_run()?;
    Ok((run, outcome))
}

/// One row of the up-to-8 active-branch preview in [`RunStatus`] ... see
/// [`StatusReport`].
#[derive(Debug, Clone, Serialize)]
pub struct ActiveBranch {
    pub node_id: String,
    pub depth: u32,
    pub status: NodeStatus,
    pub decision: crate::store::Decision,
}

/// Everything `repo_rlm_status` reports: the run, its latest node
/// snapshots, its queue events, a depth histogram, the result count, and a
/// bounded preview of in-flight branches.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub run: Run,
    pub nodes: Vec<Node>,
    pub queue_events: Vec<QueueEvent>,
    pub result_count: usize,
    pub depth_histogram: std::collections::BTreeMap<u32, u64>,
    pub active_branches: Vec<ActiveBranch>,
}

const ACTIVE_BRANCH_PREVIEW_LIMIT: usize = 8;

fn depth_histogram(nodes: &[Node]) -> std::collections::BTreeMap<u32, u64> {
    let mut histogram: std::collections::BTreeMap<u32, u64> = std::collections::BTreeMap::new();
    for node in nodes {
        *histogram.entry(node.depth).or_insert(0) += 1;
    }
    histogram
}

pub fn repo_rlm_status(base: impl Into<PathBuf>, run_id: &str) -> Result<StatusReport> {
    let store = Store::new(base, run_id);
    let run = store.get_run()?;
    let nodes = store.all_nodes()?;
    let queue_events = store.all_queue_events()?;
    let result_count = store.all_results()?.len();
    let depth_histogram = depth_histogram(&nodes);

    let active_branches = nodes
        .iter()
        .filter(|n| matches!(n.status, NodeStatus::Queued | NodeStatus::Running))
        .take(ACTIVE_BRANCH_PREVIEW_LIMIT)
        .map(|n| ActiveBranch {
            node_id: n.node_id.clone(),
            depth: n.depth,
            status: n.status,
            decision: n.decision,
        })
        .collect();

    Ok(StatusReport {
        run,
        nodes,
        queue_events,
        result_count,
        depth_histogram,
        active_branches,
    })
}

pub fn repo_rlm_cancel(base: impl Into<PathBuf>, run_id: &str) -> Result<Run> {
    let store = Store::new(base, run_id);
    Scheduler::new(&store).cancel()?;
    store.get_run()
}

pub fn repo_rlm_resume(base: impl Into<PathBuf>, run_id: &str) -> Result<Run> {
    let store = Store::new(base, run_id);
    Scheduler::new(&store).resume()?;
    store.get_run()
}

pub fn repo_rlm_synthesize(base: impl Into<PathBuf>, run_id: &str, target: Target) -> Result<(Run, SynthesisOutcome)> {
    let store = Store::new(base, run_id);
    let outcome = synthesis::synthesize(&store, target)?;
    let run = store.get_run()?;
    Ok((run, outcome))
}

/// Export format for [`repo_rlm_export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Markdown,
    Json,
}

/// The shape written to `artifacts/export.json`.
#[derive(Debug, Clone, Serialize)]
struct ExportJson {
    run_id: String,
    objective: String,
    depth_histogram: std::collections::BTreeMap<u32, u64>,
    results: Vec<crate::store::NodeResult>,
}

/// Renders a flat export of every node's latest result and writes it to
/// `artifacts/export.md` or `artifacts/export.json`, returning the path
/// relative to the run root.
pub fn repo_rlm_export(base: impl Into<PathBuf>, run_id: &str, format: ExportFormat) -> Result<String> {
    let store = Store::new(base, run_id);
    let layout = store.layout();
    let run = store.get_run()?;
    let results = store.all_results()?;

    let (relative_path, body) = match format {
        ExportFormat::Markdown => {
            let mut body = format!("# Export: {}\n\n", run.objective);
            for result in &results {
                body.push_str(&format!("## {}\n\n{}\n\n", result.node_id, result.summary));
            }
            ("artifacts/export.md".to_string(), body)
        }
        ExportFormat::Json => {
            let nodes = store.all_nodes()?;
            let export = ExportJson {
                run_id: run.run_id.clone(),
                objective: run.objective.clone(),
                depth_histogram: depth_histogram(&nodes),
                results,
            };
            let body = serde_json::to_string_pretty(&export)?;
            ("artifacts/export.json".to_string(), body)
        }
    };

    std::fs::create_dir_all(layout.artifacts_dir())?;
    std::fs::write(layout.root().join(&relative_path), body)?;
    Ok(relative_path)
}

/// Runs one interactive `rlm(query, context, ...)` call to completion and
/// returns its final answer text.
pub async fn rlm(
    llm_client: Arc<dyn LLMClient>,
    query: &str,
    context: &str,
    max_iterations: Option<u32>,
    max_llm_calls: Option<u64>,
    max_depth: Option<u32>,
) -> Result<String> {
    if context.strip_prefix("file:").is_none() {
        // plain string context; resolve_context is idempotent either way,
        // called here only to surface a config error early.
        resolve_context(context)?;
    }

    let mut config = ControllerConfig::default();
    if let Some(v) = max_iterations {
        config.max_iterations = v;
    }
    if let Some(v) = max_llm_calls {
        config.max_llm_calls = v;
    }
    if let Some(v) = max_depth {
        config.max_depth = v;
    }

    let controller = Controller::new(llm_client, config, InterpreterConfig::default());
    let outcome = controller.run(query, context).await?;
    Ok(outcome.answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RunStatus;
    use tempfile::tempdir;

    #[test]
    fn start_then_run_completes_a_tiny_scope() {
        let base = tempdir().unwrap();
        let scope = tempdir().unwrap();
        std::fs::write(scope.path().join("a.txt"), "hello").unwrap();

        let run = repo_rlm_start(base.path(), scope.path(), "audit the repo", StartOptions::default()).unwrap();
        let (run, outcome) = repo_rlm_run(base.path(), &run.run_id, 50).unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(outcome.processed_nodes, 1);
    }

    #[test]
    fn status_reports_depth_histogram_and_result_count() {
        let base = tempdir().unwrap();
        let scope = tempdir().unwrap();
        std::fs::write(scope.path().join("a.txt"), "hello").unwrap();

        let run = repo_rlm_start(base.path(), scope.path(), "audit the repo", StartOptions::default()).unwrap();
        repo_rlm_run(base.path(), &run.run_id, 50).unwrap();

        let status = repo_rlm_status(base.path(), &run.run_id).unwrap();
        assert_eq!(status.result_count, 1);
        assert_eq!(status.depth_histogram.get(&0), Some(&1));
        assert!(status.active_branches.is_empty());
    }

    #[test]
    fn cancel_then_resume_round_trips_through_the_api() {
        let base = tempdir().unwrap();
        let scope = tempdir().unwrap();
        std::fs::create_dir_all(scope.path().join("sub")).unwrap();
        std::fs::write(scope.path().join("sub").join("a.txt"), "hello").unwrap();

        let run = repo_rlm_start(base.path(), scope.path(), "audit the repo", StartOptions::default()).unwrap();
        let (run, _) = repo_rlm_step(base.path(), &run.run_id, 1).unwrap();
        assert_eq!(run.status, RunStatus::Running);

        let run = repo_rlm_cancel(base.path(), &run.run_id).unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);

        let run = repo_rlm_resume(base.path(), &run.run_id).unwrap();
        let (run, _) = repo_rlm_run(base.path(), &run.run_id, 50).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn export_writes_markdown_and_json_artifacts() {
        let base = tempdir().unwrap();
        let scope = tempdir().unwrap();
        std::fs::write(scope.path().join("a.txt"), "hello").unwrap();

        let run = repo_rlm_start(base.path(), scope.path(), "audit the repo", StartOptions::default()).unwrap();
        repo_rlm_run(base.path(), &run.run_id, 50).unwrap();

        let md_path = repo_rlm_export(base.path(), &run.run_id, ExportFormat::Markdown).unwrap();
        let json_path = repo_rlm_export(base.path(), &run.run_id, ExportFormat::Json).unwrap();
        assert_eq!(md_path, "artifacts/export.md");
        assert_eq!(json_path, "artifacts/export.json");
        assert!(base.path().join(&run.run_id).join(&md_path).exists());

        let json_body = std::fs::read_to_string(base.path().join(&run.run_id).join(&json_path)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json_body).unwrap();
        assert_eq!(parsed["depth_histogram"]["0"], 1);
        assert!(parsed["results"].as_array().unwrap().len() >= 1);
    }
}
