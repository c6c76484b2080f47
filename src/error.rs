//! Error types for rlm-engine.

use thiserror::Error;

/// Result type alias using rlm-engine's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during RLM operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The run directory could not be read or written.
    #[error("store error: {0}")]
    Store(String),

    /// Underlying filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A lifecycle transition was requested from a state that does not permit it.
    #[error("invalid lifecycle transition: {0}")]
    InvalidTransition(String),

    /// The referenced run does not exist in the store.
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// The referenced node does not exist in the store.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Interpreter subprocess communication error.
    #[error("subprocess communication error: {0}")]
    SubprocessComm(String),

    /// An execute() call against the interpreter did not complete in time.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// LLM completion call failed.
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// LLM completion call failed without a specific provider attached.
    #[error("LLM error: {0}")]
    LLM(String),

    /// The shared LLM call budget has been exhausted.
    #[error("LLM call budget exhausted: used {used}, limit {limit}")]
    BudgetExhausted { used: u64, limit: u64 },

    /// Recursion depth exceeded for an interactive sub-call.
    #[error("maximum recursion depth {max_depth} exceeded")]
    MaxDepthExceeded { max_depth: u32 },

    /// Configuration was internally inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// An invariant the core itself is responsible for was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::InvalidTransition(message.into())
    }

    pub fn subprocess_comm(message: impl Into<String>) -> Self {
        Self::SubprocessComm(message.into())
    }

    pub fn repl_execution(message: impl Into<String>) -> Self {
        Self::SubprocessComm(message.into())
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn budget_exhausted(used: u64, limit: u64) -> Self {
        Self::BudgetExhausted { used, limit }
    }

    pub fn max_depth_exceeded(max_depth: u32) -> Self {
        Self::MaxDepthExceeded { max_depth }
    }
}
