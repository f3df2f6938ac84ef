//! Fallback solver parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the PID fallback solver
#[derive(Deserialize, Debug, Clone)]
pub struct PidSolverParams {

    /// Cross track error controller proportional gain
    pub cte_k_p: f64,

    /// Cross track error controller integral gain
    pub cte_k_i: f64,

    /// Cross track error controller derivative gain
    pub cte_k_d: f64,

    /// Heading error controller proportional gain
    pub epsi_k_p: f64,

    /// Heading error controller integral gain
    pub epsi_k_i: f64,

    /// Heading error controller derivative gain
    pub epsi_k_d: f64,

    /// Speed the throttle controller aims for, in the simulator's speed units
    pub ref_speed: f64,

    /// Speed controller proportional gain
    pub speed_k_p: f64,

    /// Minimum throttle demand
    pub min_throttle: f64,

    /// Maximum throttle demand
    pub max_throttle: f64,

    /// Number of steps the prediction is rolled out over
    pub horizon_steps: usize,

    /// Duration of one prediction step
    pub step_s: f64
}

impl Default for PidSolverParams {
    fn default() -> Self {
        Self {
            cte_k_p: 0.12,
            cte_k_i: 0.0,
            cte_k_d: 0.05,
            epsi_k_p: 0.9,
            epsi_k_i: 0.0,
            epsi_k_d: 0.02,
            ref_speed: 40.0,
            speed_k_p: 0.1,
            min_throttle: -1.0,
            max_throttle: 1.0,
            horizon_steps: 10,
            step_s: 0.1
        }
    }
}
