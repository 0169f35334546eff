#![allow(non_snake_case)]

extern crate control_model;
#[macro_use]
extern crate log;
extern crate osqp_wrapper;
extern crate prelude;
extern crate sparse;
extern crate thiserror;

use thiserror::Error;

use control_model::ConfigurationError;

pub mod transcribe;
pub use transcribe::{Layout, QpProblem};

mod bounds;
pub use bounds::{update_initial_state, StateError};

mod solver;
pub use osqp_wrapper::Settings;
pub use solver::{check_bounds, default_settings, OsqpSolver, QpSolver, SolverCall, SolverError};

mod receding_horizon;
pub use receding_horizon::{error_norm, LoopState, RecedingHorizonLoop, RunRecord, StepRecord};

/// Reasons a receding horizon run stops. Every error leaves the loop in `LoopState::Failed`,
/// except `NotIdle` and `NotRunning` which leave the state unchanged.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MpcError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("solver {call} failed: {source}")]
    SolverInit {
        call: SolverCall,
        #[source]
        source: SolverError,
    },
    #[error("solve failed at step {step}: {source}")]
    Solve {
        step: usize,
        #[source]
        source: SolverError,
    },
    #[error("bound update rejected at step {step}: {source}")]
    BoundUpdate {
        step: usize,
        #[source]
        source: SolverError,
    },
    #[error("invalid plant state at step {step}: {source}")]
    InvalidState {
        step: usize,
        #[source]
        source: StateError,
    },
    #[error("loop cannot be initialised in state {state:?}")]
    NotIdle { state: LoopState },
    #[error("loop cannot step in state {state:?}")]
    NotRunning { state: LoopState },
}
