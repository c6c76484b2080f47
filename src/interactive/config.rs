//! Tunables for the interactive engine (`rlm(...)` defaults).

/// Controller-level limits for one `rlm(query, context, ...)` call.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub max_iterations: u32,
    pub max_llm_calls: u64,
    pub max_depth: u32,
    /// Consecutive interpreter errors tolerated before the loop aborts and
    /// falls back to a direct model call.
    pub max_consecutive_errors: u32,
    pub root_model: Option<String>,
    pub fallback_model: Option<String>,
    pub sub_call_model: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_llm_calls: 50,
            max_depth: 1,
            max_consecutive_errors: 3,
            root_model: None,
            fallback_model: None,
            sub_call_model: None,
        }
    }
}

/// Spawn and protocol timing for the interpreter subprocess.
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// Executable used to launch the interpreter host process.
    pub command: String,
    pub args: Vec<String>,
    /// Time allowed for the `__REPL_READY__` sentinel to appear.
    pub startup_timeout_ms: u64,
    /// Time allowed for a single `execute()` round-trip.
    pub execute_timeout_ms: u64,
    /// Grace period given to the child after a shutdown request before it
    /// is killed (mirrors the repo-scale interpreter's shutdown handling).
    pub shutdown_grace_ms: u64,
    /// Loopback port the sub-call router listens on; 0 asks the OS to pick
    /// an ephemeral port.
    pub router_port: u16,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec!["-m".to_string(), "rlm_interpreter".to_string()],
            startup_timeout_ms: 30_000,
            execute_timeout_ms: 120_000,
            shutdown_grace_ms: 2_000,
            router_port: 0,
        }
    }
}
