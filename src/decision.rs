//! Decision Engine: a pure function from node state to a leaf/split
//! decision with an explicit, ordered reason code.

use chrono::Utc;

use crate::scope::ScopeMetrics;
use crate::store::{Node, RunMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Leaf,
    Split,
}

/// One of the fixed, ordered reason codes the decision engine can return. Each short-circuits
/// the next; `reason_str` is what gets persisted on the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    DeadlineExceeded,
    MaxDepthReached,
    LlmBudgetExhausted,
    TokenBudgetExhausted,
    ScopeTooLarge,
    ScopeSmallEnough,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::MaxDepthReached => "max_depth_reached",
            Self::LlmBudgetExhausted => "llm_budget_exhausted",
            Self::TokenBudgetExhausted => "token_budget_exhausted",
            Self::ScopeTooLarge => "scope_too_large",
            Self::ScopeSmallEnough => "scope_small_enough",
        }
    }
}

pub struct DecisionOutcome {
    pub decision: Decision,
    pub reason: Reason,
    pub metrics: ScopeMetrics,
}

/// Split thresholds by mode: review mode is stricter so more
/// of a review run's tree gets analyzed leaf-by-leaf.
fn thresholds(mode: RunMode) -> (u64, u64) {
    match mode {
        RunMode::Review => (12, 2_000_000),
        RunMode::Generic | RunMode::Wiki => (16, 3_000_000),
    }
}

/// Evaluate the leaf/split decision for `node` under `config`/`mode`,
/// walking its scope with `max_sample_files` to obtain metrics. Pure given
/// `now_epoch_ms` and the filesystem state of the scope.
pub fn decide(
    node: &Node,
    mode: RunMode,
    now_epoch_ms: i64,
    max_sample_files: usize,
) -> DecisionOutcome {
    if now_epoch_ms > node.budgets.deadline_epoch_ms {
        return DecisionOutcome {
            decision: Decision::Leaf,
            reason: Reason::DeadlineExceeded,
            metrics: ScopeMetrics::default(),
        };
    }
    if node.depth >= node.budgets.max_depth {
        return DecisionOutcome {
            decision: Decision::Leaf,
            reason: Reason::MaxDepthReached,
            metrics: ScopeMetrics::default(),
        };
    }
    if node.budgets.is_llm_exhausted() {
        return DecisionOutcome {
            decision: Decision::Leaf,
            reason: Reason::LlmBudgetExhausted,
            metrics: ScopeMetrics::default(),
        };
    }
    if node.budgets.is_token_exhausted() {
        return DecisionOutcome {
            decision: Decision::Leaf,
            reason: Reason::TokenBudgetExhausted,
            metrics: ScopeMetrics::default(),
        };
    }

    let metrics = crate::scope::walk_scope(&node.scope_ref.paths, max_sample_files);
    let (t_files, t_bytes) = thresholds(mode);
    if metrics.file_count > t_files || metrics.total_bytes > t_bytes {
        DecisionOutcome {
            decision: Decision::Split,
            reason: Reason::ScopeTooLarge,
            metrics,
        }
    } else {
        DecisionOutcome {
            decision: Decision::Leaf,
            reason: Reason::ScopeSmallEnough,
            metrics,
        }
    }
}

/// Current wall-clock time as epoch milliseconds, for callers that need
/// `now_epoch_ms` without depending on `chrono` directly.
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}
