//! Interactive RLM Engine: per-query controller, interpreter host,
//! and sub-call router.

pub mod config;
pub mod controller;
pub mod interpreter;
pub mod parse;
pub mod subcall;
pub mod trajectory;

pub use config::{ControllerConfig, InterpreterConfig};
pub use controller::{resolve_context, Controller, RunOutcome};
pub use interpreter::{ExecuteOutcome, InterpreterHost};
pub use subcall::{router as sub_call_router, AppState as SubCallState, ChildSpawner};
pub use trajectory::{
    CallTree, SharedBudget, SubCall, SubCallStatus, SubCallType, Trajectory, TrajectoryStep,
};
