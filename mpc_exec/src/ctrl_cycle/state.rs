//! Implementations for the ControlCycle state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::time::Instant;
use log::{debug, trace, warn};
use serde::Serialize;

// Internal
use comms_if::sim::{SteerCmd, Telemetry};
use util::module::State;
use crate::{
    frame,
    latency::{self, Pose},
    poly_fit::{self, PolyFitError},
    solver::{ControllerState, Solver, SolverError}
};
use super::{Actuation, ControlParams, CycleError, CycleInitError, CycleStage};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Control cycle module state
pub struct ControlCycle {
    params: ControlParams,

    solver: Box<dyn Solver>,

    stage: CycleStage,

    report: StatusReport
}

/// Input data to the control cycle.
#[derive(Debug, Clone)]
pub struct CycleInput {
    /// Telemetry received from the simulator
    pub telemetry: Telemetry,

    /// The actuation sent in response to the previous telemetry on this connection
    pub last_actuation: Actuation
}

/// Output of a successful control cycle.
#[derive(Debug, Clone)]
pub struct CycleOutput {
    /// The command to send to the simulator
    pub cmd: SteerCmd,

    /// The actuation in the command, which becomes the connection's last actuation
    pub actuation: Actuation
}

/// Status report for control cycle processing.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatusReport {
    /// The last stage the cycle reached
    pub stage: CycleStage,

    /// Latency compensated pose in the world frame
    pub projected_pose: Pose,

    /// Latency compensated speed
    pub projected_speed: f64,

    /// Cross track error at the projected pose
    pub cte: f64,

    /// Heading error at the projected pose
    pub epsi: f64,

    /// Time spent in the solver.
    ///
    /// Units: seconds
    pub solve_time_s: f64,

    /// Number of predicted trajectory points in the command
    pub num_predicted_points: usize,

    /// True if the solver's trajectory had an odd number of values and the last was dropped
    pub dangling_value: bool
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ControlCycle {
    /// Create a new cycle around the given solver, using the default parameters until
    /// initialised.
    pub fn new(solver: Box<dyn Solver>) -> Self {
        Self {
            params: ControlParams::default(),
            solver,
            stage: CycleStage::Idle,
            report: StatusReport::default()
        }
    }

    /// The current stage of the cycle, `Idle` between cycles.
    pub fn stage(&self) -> CycleStage {
        self.stage
    }

    /// The parameters in use.
    pub fn params(&self) -> &ControlParams {
        &self.params
    }

    fn enter(&mut self, stage: CycleStage) {
        self.stage = stage;
        self.report.stage = stage;
    }

    /// Run the stages of one cycle.
    fn run(&mut self, input: &CycleInput) -> Result<CycleOutput, CycleError> {
        let tm = &input.telemetry;
        let last = &input.last_actuation;

        // ---- FRAME BUILDING ----

        self.enter(CycleStage::FrameBuilding);

        tm.validate()?;

        // Project where the vehicle will be once the command is applied
        let (pose, speed) = latency::project(
            &Pose {
                x: tm.x,
                y: tm.y,
                psi: tm.psi
            },
            tm.speed,
            last.steering_angle,
            last.throttle,
            self.params.latency_s,
            self.params.lf_m
        );
        self.report.projected_pose = pose;
        self.report.projected_speed = speed;

        let waypoints = frame::to_vehicle_frame(
            &frame::from_xy(&tm.ptsx, &tm.ptsy),
            pose.x,
            pose.y,
            pose.psi
        );
        let (xs, ys) = frame::split_xy(&waypoints);

        // ---- FITTING ----

        self.enter(CycleStage::Fitting);

        let coeffs = poly_fit::fit(&xs, &ys, self.params.poly_order)?;
        trace!("Reference coefficients: {:?}", coeffs.as_slice());

        // ---- STATE ASSEMBLY ----

        self.enter(CycleStage::StateAssembly);

        // The vehicle sits at the origin of its own frame, pointing along X
        let cte = poly_fit::evaluate(&coeffs, 0.0);
        let epsi = -poly_fit::slope_at_zero(&coeffs).atan();
        self.report.cte = cte;
        self.report.epsi = epsi;

        let state = ControllerState::at_origin(speed, cte, epsi);

        // ---- SOLVING ----

        self.enter(CycleStage::Solving);

        let start = Instant::now();
        let soln = self.solver.solve(&state, &coeffs)?;
        self.report.solve_time_s = start.elapsed().as_secs_f64();

        if soln.len() < 2 {
            return Err(SolverError::SolutionTooShort(soln.len()).into())
        }
        if !soln[0].is_finite() || !soln[1].is_finite() {
            return Err(SolverError::NonFiniteActuation(soln[0], soln[1]).into())
        }
        if let Some(i) = soln[2..].iter().position(|v| !v.is_finite()) {
            return Err(SolverError::NonFiniteTrajectory(i).into())
        }

        // ---- EMITTING ----

        self.enter(CycleStage::Emitting);

        let actuation = Actuation {
            steering_angle: soln[0] / self.params.steer_norm_factor(),
            throttle: soln[1]
        };

        let traj = &soln[2..];
        if traj.len() % 2 != 0 {
            warn!(
                "Solver returned an odd number ({}) of trajectory values, dropping the last", 
                traj.len()
            );
            self.report.dangling_value = true;
        }
        let (mpc_x, mpc_y): (Vec<f64>, Vec<f64>) = traj
            .chunks_exact(2)
            .map(|p| (p[0], p[1]))
            .unzip();
        self.report.num_predicted_points = mpc_x.len();

        // Reference line for display, starting one spacing ahead of the vehicle
        let (next_x, next_y): (Vec<f64>, Vec<f64>) = (1..=self.params.ref_num_points)
            .map(|i| {
                let x = self.params.ref_spacing_m * i as f64;
                (x, poly_fit::evaluate(&coeffs, x))
            })
            .unzip();

        // Non-finite values would go out as JSON nulls
        if next_y.iter().any(|y| !y.is_finite()) {
            return Err(PolyFitError::NonFinite.into())
        }

        Ok(CycleOutput {
            cmd: SteerCmd {
                steering_angle: actuation.steering_angle,
                throttle: actuation.throttle,
                mpc_x,
                mpc_y,
                next_x,
                next_y
            },
            actuation
        })
    }
}

impl State for ControlCycle {
    type InitData = ControlParams;
    type InitError = CycleInitError;

    type InputData = CycleInput;
    type OutputData = CycleOutput;
    type StatusReport = StatusReport;
    type ProcError = CycleError;

    /// Initialise the control cycle with the given parameters.
    fn init(&mut self, init_data: Self::InitData) -> Result<(), Self::InitError> {
        init_data.validate()?;

        self.params = init_data;
        self.stage = CycleStage::Idle;

        Ok(())
    }

    /// Run one control cycle for one telemetry frame.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    {
        // Clear the status report
        self.report = StatusReport::default();

        let result = self.run(input_data);

        match result {
            Ok(ref output) => debug!(
                "Cycle: cte {:.3} m, epsi {:.3} rad, steer {:.3}, throttle {:.3}, solve {:.2} ms",
                self.report.cte,
                self.report.epsi,
                output.actuation.steering_angle,
                output.actuation.throttle,
                self.report.solve_time_s * 1e3
            ),
            Err(ref e) => debug!("Cycle aborted in the {:?} stage: {}", self.stage, e)
        }

        self.stage = CycleStage::Idle;

        result.map(|output| (output, self.report))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
