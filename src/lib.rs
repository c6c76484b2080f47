//! # rlm-engine
//!
//! A Recursive Language Model (RLM) execution engine: two tightly coupled
//! subsystems sharing one recursion model (bounded depth, shared budgets,
//! deterministic decision reasons, evidence-bearing results).
//!
//! - **Interactive RLM Engine** (`interactive`): a per-query controller that
//!   spawns a persistent code-interpreter child process, drives a bounded
//!   code/execute/observe loop against a root model, and lets interpreter
//!   code call back into the engine for sub-model or child-RLM calls over a
//!   local HTTP loopback.
//! - **Repo-Scale Recursive Runner** (`store`, `scope`, `decision`, `split`,
//!   `leaf`, `scheduler`, `synthesis`): an event-sourced orchestrator over a
//!   persistent run directory that decomposes a source tree into a tree of
//!   nodes, decides per node whether to analyze as a leaf or split into
//!   children, executes leaves, aggregates children upward, and synthesizes
//!   deterministic review/wiki artifacts from terminal node results.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rlm_engine::store::{Run, Store};
//! use rlm_engine::scheduler::Scheduler;
//!
//! let store = Store::new("/tmp/rlm-runs", "run-1");
//! // ... init_run(...) ...
//! let scheduler = Scheduler::new(&store);
//! let outcome = scheduler.run_until(200)?;
//! # Ok::<(), rlm_engine::Error>(())
//! ```

pub mod api;
pub mod decision;
pub mod error;
pub mod finding;
pub mod interactive;
pub mod leaf;
pub mod llm;
pub mod scheduler;
pub mod scope;
pub mod split;
pub mod store;
pub mod synthesis;

pub use api::{
    repo_rlm_cancel, repo_rlm_export, repo_rlm_resume, repo_rlm_run, repo_rlm_start,
    repo_rlm_status, repo_rlm_step, repo_rlm_synthesize, rlm, ActiveBranch, ExportFormat,
    StartOptions, StatusReport,
};
pub use decision::{decide, now_epoch_ms, Decision as DecisionChoice, DecisionOutcome, Reason as DecisionReason};
pub use error::{Error, Result};
pub use finding::{Evidence, Finding, Severity};
pub use interactive::{
    resolve_context, CallTree, Controller, ControllerConfig, ExecuteOutcome, InterpreterConfig,
    InterpreterHost, RunOutcome, SharedBudget, SubCall, SubCallStatus, SubCallType, Trajectory,
    TrajectoryStep,
};
pub use leaf::{execute_leaf, LeafOutcome};
pub use llm::{
    AnthropicClient, ChatMessage, ClientConfig, CompletionRequest, CompletionResponse, CostTracker,
    LLMClient, ModelSpec, Provider, TokenUsage,
};
pub use scheduler::{BatchOutcome, Scheduler};
pub use scope::{walk_scope, ScopeMetrics};
pub use split::{plan_children, PlannedChild};
pub use store::{
    sanitize_for_filename, Budgets, Checkpoint, Decision, Domain, Node, NodeError, NodeMetrics,
    NodeResult, NodeStatus, OutputEntry, Progress, ResultArtifact, ResultStatus, Run, RunConfig,
    RunLayout, RunMode, RunStatus, SchedulerMode, ScopeRef, ScopeType, Store,
};
pub use synthesis::{synthesize, SynthesisOutcome, Target as SynthesisTarget};
