//! # PID fallback solver
//!
//! Drives the vehicle with two PID loops, one on cross track error and one on heading error, whose
//! sum is the steering demand. Throttle tracks a reference speed proportionally. The loops are
//! rolled out over a short horizon with the kinematic bicycle model to produce the predicted
//! trajectory the simulator draws.
//!
//! Steering follows the simulator's convention: a positive angle turns right, so heading
//! decreases as `psi -= v / lf * delta * dt`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::trace;
use serde::Serialize;

// Internal
use util::maths::{clamp, wrap_pi};
use crate::{
    ctrl_cycle::ControlParams,
    poly_fit::{self, PolyCoeffs}
};
use super::{ControllerState, PidSolverParams, Solver, SolverError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A PID controller with explicit time steps.
#[derive(Debug, Serialize, Clone)]
pub struct PidController {
    /// Proportional gain
    k_p: f64,

    /// Integral gain
    k_i: f64,

    /// Dervative gain
    k_d: f64,

    /// Previous error
    prev_error: Option<f64>,

    /// The integral accumulation
    integral: f64
}

/// The fallback solver.
#[derive(Debug, Clone)]
pub struct PidSolver {
    params: PidSolverParams,

    /// Front axle to centre of gravity distance
    lf_m: f64,

    /// Physical steering limit
    max_steer_rad: f64,

    /// Lateral (cross track) error controller
    lat_ctrl: PidController,

    /// Heading error controller
    head_ctrl: PidController
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PidController {

    /// Create a new controller with the given gains.
    pub fn new(k_p: f64, k_i: f64, k_d: f64) -> Self {
        Self {
            k_p, k_i, k_d,
            integral: 0f64,
            prev_error: None
        }
    }

    /// Get the value of the controller for the given error, `dt` seconds after the previous one.
    ///
    /// On the first call, or if `dt` is not positive, neither the integral nor the derivative
    /// contributes, avoiding a spike in either.
    pub fn get(&mut self, error: f64, dt: f64) -> f64 {
        let deriv = match self.prev_error {
            Some(e) if dt > 0.0 => {
                self.integral += error * dt;
                (error - e) / dt
            },
            _ => 0f64
        };

        let out = 
            self.k_p * error 
            + self.k_i * self.integral 
            + self.k_d * deriv;

        self.prev_error = Some(error);

        out
    }

    /// Clear the integral and derivative history.
    pub fn reset(&mut self) {
        self.integral = 0f64;
        self.prev_error = None;
    }
}

impl PidSolver {

    /// Create a new solver from its own parameters and the vehicle geometry in the control
    /// parameters.
    pub fn new(params: PidSolverParams, control: &ControlParams) -> Self {
        Self {
            lat_ctrl: PidController::new(
                params.cte_k_p, params.cte_k_i, params.cte_k_d
            ),
            head_ctrl: PidController::new(
                params.epsi_k_p, params.epsi_k_i, params.epsi_k_d
            ),
            lf_m: control.lf_m,
            max_steer_rad: control.max_steer_rad(),
            params
        }
    }

    /// Steering demand for the given errors, limited to the physical steering range.
    ///
    /// Positive cross track error means the reference is to the left, which needs a left
    /// (negative) turn. Positive heading error means the vehicle points left of the reference
    /// tangent, which needs a right (positive) turn.
    fn steer_dem(&mut self, cte: f64, epsi: f64, dt: f64) -> f64 {
        let delta = 
            - self.lat_ctrl.get(cte, dt) 
            + self.head_ctrl.get(epsi, dt);

        clamp(&delta, &-self.max_steer_rad, &self.max_steer_rad)
    }

    /// Throttle demand to track the reference speed.
    fn throttle_dem(&self, v: f64) -> f64 {
        clamp(
            &(self.params.speed_k_p * (self.params.ref_speed - v)),
            &self.params.min_throttle,
            &self.params.max_throttle
        )
    }
}

impl Solver for PidSolver {
    fn solve(
        &mut self, 
        state: &ControllerState, 
        coeffs: &PolyCoeffs
    ) -> Result<Vec<f64>, SolverError> {
        let dt = self.params.step_s;
        if !(dt > 0.0) {
            return Err(SolverError::Infeasible(
                format!("Prediction step must be positive, found {}", dt)
            ))
        }

        // The controllers only carry history within one rollout
        self.lat_ctrl.reset();
        self.head_ctrl.reset();

        // First actuation comes from the errors the cycle computed
        let delta = self.steer_dem(state.cte, state.epsi, dt);
        let accel = self.throttle_dem(state.v);

        let mut soln = Vec::with_capacity(2 + 2 * self.params.horizon_steps);
        soln.push(delta * self.lf_m);
        soln.push(accel);

        // Roll out the bicycle model over the horizon
        let (mut x, mut y, mut psi, mut v) = (state.x, state.y, state.psi, state.v);
        let (mut step_delta, mut step_accel) = (delta, accel);

        for _ in 0..self.params.horizon_steps {
            x += v * psi.cos() * dt;
            y += v * psi.sin() * dt;
            psi -= v / self.lf_m * step_delta * dt;
            v += step_accel * dt;

            soln.push(x);
            soln.push(y);

            let cte = poly_fit::evaluate(coeffs, x) - y;
            let epsi = wrap_pi(psi - poly_fit::derivative_at(coeffs, x).atan());

            step_delta = self.steer_dem(cte, epsi, dt);
            step_accel = self.throttle_dem(v);
        }

        trace!(
            "PidSolver: delta {:.4} rad, accel {:.4}, {} predicted points", 
            delta, accel, self.params.horizon_steps
        );

        Ok(soln)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::DVector;

    fn solver() -> PidSolver {
        PidSolver::new(PidSolverParams::default(), &ControlParams::default())
    }

    #[test]
    fn test_pid_controller() {
        let mut pid = PidController::new(2.0, 1.0, 0.5);

        // First call is proportional only
        assert_abs_diff_eq!(pid.get(1.0, 0.1), 2.0);

        // Second call: integral 0.3 * 0.1, derivative (0.3 - 1.0) / 0.1
        assert_abs_diff_eq!(pid.get(0.3, 0.1), 0.6 + 0.03 - 3.5, epsilon = 1e-12);

        pid.reset();
        assert_abs_diff_eq!(pid.get(-1.0, 0.1), -2.0);
    }

    #[test]
    fn test_on_reference() {
        // Straight reference along the X axis, already at reference speed
        let mut s = solver();
        let coeffs = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.0]);
        let state = ControllerState::at_origin(40.0, 0.0, 0.0);

        let soln = s.solve(&state, &coeffs).unwrap();

        assert_eq!(soln.len(), 2 + 2 * PidSolverParams::default().horizon_steps);
        assert_abs_diff_eq!(soln[0], 0.0);
        assert_abs_diff_eq!(soln[1], 0.0);

        // Straight ahead at 4 m per step
        for (i, p) in soln[2..].chunks(2).enumerate() {
            assert_abs_diff_eq!(p[0], 4.0 * (i + 1) as f64, epsilon = 1e-9);
            assert_abs_diff_eq!(p[1], 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_steers_towards_reference() {
        let mut s = solver();

        // Reference 1 m to the left: steer left (negative)
        let coeffs = DVector::from_vec(vec![1.0, 0.0, 0.0, 0.0]);
        let soln = s.solve(&ControllerState::at_origin(20.0, 1.0, 0.0), &coeffs).unwrap();
        assert!(soln[0] < 0.0);

        // Reference 1 m to the right: steer right (positive)
        let coeffs = DVector::from_vec(vec![-1.0, 0.0, 0.0, 0.0]);
        let soln = s.solve(&ControllerState::at_origin(20.0, -1.0, 0.0), &coeffs).unwrap();
        assert!(soln[0] > 0.0);

        // Below reference speed: accelerate
        assert!(soln[1] > 0.0);
    }

    #[test]
    fn test_steering_limit() {
        let mut s = solver();
        let control = ControlParams::default();

        let coeffs = DVector::from_vec(vec![100.0, 0.0, 0.0, 0.0]);
        let soln = s.solve(&ControllerState::at_origin(10.0, 100.0, 0.0), &coeffs).unwrap();

        // Saturated, and normalises to exactly -1
        assert_abs_diff_eq!(soln[0], -control.max_steer_rad() * control.lf_m, epsilon = 1e-12);
        assert_abs_diff_eq!(soln[0] / control.steer_norm_factor(), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_step() {
        let params = PidSolverParams {
            step_s: 0.0,
            ..PidSolverParams::default()
        };
        let mut s = PidSolver::new(params, &ControlParams::default());
        let coeffs = DVector::from_vec(vec![0.0; 4]);

        assert!(matches!(
            s.solve(&ControllerState::at_origin(0.0, 0.0, 0.0), &coeffs),
            Err(SolverError::Infeasible(_))
        ));
    }
}
