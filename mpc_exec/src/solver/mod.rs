//! # Solver module
//!
//! The solver is the trajectory optimiser the control cycle hands its prepared state to. Any
//! optimiser can be used so long as it meets the [`Solver`] contract:
//!
//! - input: the 6 element [`ControllerState`] in the vehicle frame and the fitted reference
//!   polynomial,
//! - output: a flat list of reals where the first two values are the steering and throttle
//!   demands (in the solver's native units) and the rest is the predicted trajectory as
//!   interleaved `x, y` pairs in the vehicle frame.
//!
//! A PID based fallback, [`PidSolver`], is provided so the bridge can drive the simulator without
//! a nonlinear optimiser.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod params;
pub mod pid;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

use crate::poly_fit::PolyCoeffs;

pub use params::PidSolverParams;
pub use pid::{PidController, PidSolver};

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A trajectory optimiser.
pub trait Solver: Send {
    /// Solve for the next actuation from the given state and reference polynomial.
    fn solve(
        &mut self, 
        state: &ControllerState, 
        coeffs: &PolyCoeffs
    ) -> Result<Vec<f64>, SolverError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The state handed to the solver, expressed in the vehicle frame at the projected pose.
///
/// `x`, `y` and `psi` are always zero since the frame is centred on the vehicle, but they are
/// kept so the state matches the optimiser's full state vector.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize)]
pub struct ControllerState {
    pub x: f64,
    pub y: f64,
    pub psi: f64,

    /// Speed
    pub v: f64,

    /// Cross track error, the reference's lateral offset at the vehicle
    pub cte: f64,

    /// Heading error to the reference tangent at the vehicle
    pub epsi: f64
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Failures of the solver to produce a usable command.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SolverError {
    #[error("No feasible solution found: {0}")]
    Infeasible(String),

    #[error("The solution contains {0} values, at least the 2 actuation values are required")]
    SolutionTooShort(usize),

    #[error("The solution's actuation is not finite (steering {0}, throttle {1})")]
    NonFiniteActuation(f64, f64),

    #[error("Predicted trajectory value {0} is not finite")]
    NonFiniteTrajectory(usize)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ControllerState {
    /// Build the state of a vehicle sitting at the origin of its own frame.
    pub fn at_origin(v: f64, cte: f64, epsi: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            psi: 0.0,
            v,
            cte,
            epsi
        }
    }

    /// The state as the ordered tuple `(x, y, psi, v, cte, epsi)`.
    pub fn as_array(&self) -> [f64; 6] {
        [self.x, self.y, self.psi, self.v, self.cte, self.epsi]
    }
}

impl<F> Solver for F 
where
    F: FnMut(&ControllerState, &PolyCoeffs) -> Result<Vec<f64>, SolverError> + Send
{
    fn solve(
        &mut self, 
        state: &ControllerState, 
        coeffs: &PolyCoeffs
    ) -> Result<Vec<f64>, SolverError> {
        self(state, coeffs)
    }
}
