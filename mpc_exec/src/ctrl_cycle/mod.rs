//! # Control cycle module
//!
//! The control cycle turns one telemetry frame into one steering command. Each cycle moves
//! through the following stages:
//!
//! 1. `FrameBuilding` - validate the telemetry, project the pose forward by the actuation latency
//!    using the last command sent, and move the waypoints into the vehicle frame at that pose.
//! 2. `Fitting` - fit the reference polynomial to the waypoints.
//! 3. `StateAssembly` - build the solver state from the cross track and heading errors.
//! 4. `Solving` - call the solver, exactly once.
//! 5. `Emitting` - normalise the actuation and build the command with the predicted and
//!    reference trajectories.
//!
//! Any failure aborts the cycle without a command. The cycle carries no numeric state between
//! frames, the last actuation is held by the connection's session and passed in.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

use comms_if::sim::SimParseError;
use crate::{
    poly_fit::PolyFitError,
    solver::SolverError
};

pub use params::*;
pub use state::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An actuation command, as last sent to the simulator.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize)]
pub struct Actuation {
    /// Steering demand normalised to [-1, 1], positive turns right
    pub steering_angle: f64,

    /// Throttle demand
    pub throttle: f64
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Stages of a control cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum CycleStage {
    Idle,
    FrameBuilding,
    Fitting,
    StateAssembly,
    Solving,
    Emitting
}

/// Errors which can occur during the initialisation of the control cycle.
#[derive(Debug, thiserror::Error)]
pub enum CycleInitError {
    #[error("Invalid control parameter {0}: {1}")]
    InvalidParam(&'static str, f64)
}

/// Errors which abort a control cycle.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("Malformed telemetry: {0}")]
    MalformedTelemetry(#[from] SimParseError),

    #[error("Could not fit the reference polynomial: {0}")]
    DegenerateFit(#[from] PolyFitError),

    #[error("Solver failed: {0}")]
    SolverFailure(#[from] SolverError)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Actuation {
    /// The neutral command: wheels straight, no throttle.
    pub fn neutral() -> Self {
        Self::default()
    }
}

impl Default for CycleStage {
    fn default() -> Self {
        CycleStage::Idle
    }
}
