//! # MPC bridge library.
//!
//! Everything between the simulator's telemetry and the solver: the numeric pipeline of the
//! control cycle, the per-connection sessions and the connection handling.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Control cycle - turns one telemetry frame into one steering command
pub mod ctrl_cycle;

/// Conversions between the world frame and the vehicle frame
pub mod frame;

/// Latency compensation - projects the vehicle pose forward by the actuation latency
pub mod latency;

/// Least-squares polynomial fitting of the reference waypoints
pub mod poly_fit;

/// Simulator server - accepts connections and runs their handlers
pub mod sim_server;

/// Simulator session - the state of a single connection
pub mod sim_session;

/// Solver interface and the PID fallback solver
pub mod solver;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Parameters of the executable, loaded from `mpc_exec.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MpcExecParams {
    /// Control cycle parameters
    #[serde(default)]
    pub control: ctrl_cycle::ControlParams,

    /// Fallback solver parameters
    #[serde(default)]
    pub solver: solver::PidSolverParams
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_params_file() {
        let params: MpcExecParams = util::params::from_str(
            include_str!("../../params/mpc_exec.toml")
        ).unwrap();

        params.control.validate().unwrap();
        assert_eq!(params.control.ref_num_points, 24);
        assert_eq!(params.solver.horizon_steps, 10);
    }

    #[test]
    fn test_params_defaults() {
        let params: MpcExecParams = util::params::from_str("").unwrap();
        assert_eq!(params.control.poly_order, 3);
    }
}
