//! # Simulator session
//!
//! One [`SimSession`] exists per simulator connection. It owns the connection's control cycle and
//! the actuation last sent on that connection, which the next cycle uses for latency
//! compensation. Nothing here is shared between connections.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, trace};
use serde::Serialize;

// Internal
use comms_if::sim::{Reply, SimFrame, Telemetry};
use util::module::State;
use crate::ctrl_cycle::{Actuation, ControlCycle, CycleError, CycleInput};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// State of a single simulator connection.
pub struct SimSession {
    /// Identifier used in logs, normally the peer address
    id: String,

    cycle: ControlCycle,

    last_actuation: Actuation,

    state: SessionState,

    /// Number of cycles which produced a command
    num_cycles: u64,

    /// Number of cycles which were aborted
    num_skipped: u64
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Lifecycle of a session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// No connection, frames are rejected
    Disconnected,

    /// Connected but no telemetry received yet (or only manual driving frames)
    Connected,

    /// Telemetry is being received
    Streaming
}

/// Errors which mean a frame produced no reply.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("The session is not connected")]
    NotConnected,

    #[error(transparent)]
    Cycle(#[from] CycleError)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimSession {
    /// Create a new, disconnected, session around an initialised control cycle.
    pub fn new<S: Into<String>>(id: S, cycle: ControlCycle) -> Self {
        Self {
            id: id.into(),
            cycle,
            last_actuation: Actuation::neutral(),
            state: SessionState::Disconnected,
            num_cycles: 0,
            num_skipped: 0
        }
    }

    /// Start the session. The last actuation is reset to neutral.
    pub fn on_connect(&mut self) {
        self.last_actuation = Actuation::neutral();
        self.state = SessionState::Connected;
        self.num_cycles = 0;
        self.num_skipped = 0;

        info!("[{}] Simulator connected", self.id);
    }

    /// Handle one inbound text frame, returning the reply to send if there is one.
    ///
    /// The stored actuation is only updated when a cycle succeeds.
    pub fn handle(&mut self, frame: &str) -> Result<Option<Reply>, SessionError> {
        if self.state == SessionState::Disconnected {
            return Err(SessionError::NotConnected)
        }

        trace!("[{}] <- {}", self.id, frame);

        let parsed = SimFrame::parse(frame)
            .map_err(CycleError::from)
            .map_err(|e| self.skipped(e))?;

        match parsed {
            SimFrame::NotEvent => Ok(None),
            SimFrame::Manual => Ok(Some(Reply::Manual)),
            SimFrame::Other(name) => {
                debug!("[{}] Ignoring \"{}\" event", self.id, name);
                Ok(None)
            },
            SimFrame::Telemetry(data) => {
                let telemetry = Telemetry::from_value(data)
                    .map_err(CycleError::from)
                    .map_err(|e| self.skipped(e))?;

                self.state = SessionState::Streaming;

                let (output, _report) = self.cycle
                    .proc(&CycleInput {
                        telemetry,
                        last_actuation: self.last_actuation
                    })
                    .map_err(|e| self.skipped(e))?;

                self.last_actuation = output.actuation;
                self.num_cycles += 1;

                Ok(Some(Reply::Steer(output.cmd)))
            }
        }
    }

    /// End the session.
    pub fn on_disconnect(&mut self) {
        if self.state != SessionState::Disconnected {
            info!(
                "[{}] Simulator disconnected after {} cycles ({} skipped)", 
                self.id, self.num_cycles, self.num_skipped
            );
        }

        self.state = SessionState::Disconnected;
    }

    /// The actuation last sent on this connection.
    pub fn last_actuation(&self) -> Actuation {
        self.last_actuation
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn skipped(&mut self, e: CycleError) -> SessionError {
        self.num_skipped += 1;
        SessionError::Cycle(e)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::{
        sync::{Arc, Mutex},
        thread
    };
    use approx::assert_abs_diff_eq;
    use serde_json::json;
    use comms_if::sim::SimParseError;
    use crate::{
        ctrl_cycle::ControlParams,
        poly_fit::PolyCoeffs,
        solver::{ControllerState, SolverError}
    };

    /// A session whose solver always demands the given steering and throttle, recording the speed
    /// it was given.
    fn session(id: &str, steer: f64, throttle: f64) -> (SimSession, Arc<Mutex<Vec<f64>>>) {
        let speeds = Arc::new(Mutex::new(Vec::new()));
        let speeds_solver = speeds.clone();
        let factor = ControlParams::default().steer_norm_factor();

        let mut cycle = ControlCycle::new(Box::new(
            move |s: &ControllerState, _: &PolyCoeffs| -> Result<Vec<f64>, SolverError> {
                speeds_solver.lock().unwrap().push(s.v);
                Ok(vec![steer * factor, throttle, 1.0, 0.0])
            }
        ));
        cycle.init(ControlParams::default()).unwrap();

        (SimSession::new(id, cycle), speeds)
    }

    fn telemetry_frame(speed: f64) -> String {
        format!("42{}", json!(["telemetry", {
            "ptsx": [10.0, 20.0, 30.0, 40.0],
            "ptsy": [0.0, 0.0, 0.0, 0.0],
            "x": 0.0,
            "y": 0.0,
            "psi": 0.0,
            "speed": speed,
            "steering_angle": 0.0,
            "throttle": 0.0
        }]))
    }

    #[test]
    fn test_lifecycle() {
        let (mut s, _) = session("test", 0.5, 0.2);
        assert_eq!(s.state(), SessionState::Disconnected);
        assert!(matches!(s.handle(&telemetry_frame(0.0)), Err(SessionError::NotConnected)));

        s.on_connect();
        assert_eq!(s.state(), SessionState::Connected);
        assert_eq!(s.last_actuation(), Actuation::neutral());

        let reply = s.handle(&telemetry_frame(0.0)).unwrap().unwrap();
        assert_eq!(s.state(), SessionState::Streaming);
        match reply {
            Reply::Steer(cmd) => {
                assert_abs_diff_eq!(cmd.steering_angle, 0.5, epsilon = 1e-12);
                assert_abs_diff_eq!(cmd.throttle, 0.2);
            },
            r => panic!("Expected a steer reply, got {:?}", r)
        }
        assert_abs_diff_eq!(s.last_actuation().steering_angle, 0.5, epsilon = 1e-12);

        s.on_disconnect();
        assert_eq!(s.state(), SessionState::Disconnected);

        // Reconnecting starts from neutral again
        s.on_connect();
        assert_eq!(s.last_actuation(), Actuation::neutral());
    }

    #[test]
    fn test_manual_and_ignored_frames() {
        let (mut s, speeds) = session("test", 0.0, 0.0);
        s.on_connect();

        let reply = s.handle("42[\"telemetry\",null]").unwrap().unwrap();
        assert_eq!(reply, Reply::Manual);
        assert_eq!(reply.to_frame().unwrap(), "42[\"manual\",{}]");

        // Not event frames and unknown events get no reply
        assert_eq!(s.handle("2").unwrap(), None);
        assert_eq!(s.handle("0{\"sid\":\"abc\"}").unwrap(), None);
        assert_eq!(s.handle("42[\"other\",{\"a\":[1]}]").unwrap(), None);

        assert!(speeds.lock().unwrap().is_empty());
        assert_eq!(s.state(), SessionState::Connected);
    }

    #[test]
    fn test_missing_psi() {
        let (mut s, speeds) = session("test", 0.25, 0.5);
        s.on_connect();
        s.handle(&telemetry_frame(10.0)).unwrap();
        let before = s.last_actuation();

        let frame = format!("42{}", json!(["telemetry", {
            "ptsx": [10.0, 20.0, 30.0, 40.0],
            "ptsy": [0.0, 0.0, 0.0, 0.0],
            "x": 0.0,
            "y": 0.0,
            "speed": 10.0
        }]));

        assert!(matches!(
            s.handle(&frame),
            Err(SessionError::Cycle(CycleError::MalformedTelemetry(
                SimParseError::InvalidTelemetry(_)
            )))
        ));
        assert_eq!(s.last_actuation(), before);
        assert_eq!(speeds.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_interleaved_sessions() {
        let (mut a, speeds_a) = session("a", 0.5, 1.0);
        let (mut b, speeds_b) = session("b", -0.5, -1.0);
        a.on_connect();
        b.on_connect();

        for _ in 0..3 {
            a.handle(&telemetry_frame(10.0)).unwrap();
            b.handle(&telemetry_frame(10.0)).unwrap();
        }

        assert_abs_diff_eq!(a.last_actuation().throttle, 1.0);
        assert_abs_diff_eq!(b.last_actuation().throttle, -1.0);

        // Each projection only ever used its own connection's last throttle
        let speeds_a = speeds_a.lock().unwrap();
        let speeds_b = speeds_b.lock().unwrap();
        assert_abs_diff_eq!(speeds_a[0], 10.0);
        assert_abs_diff_eq!(speeds_b[0], 10.0);
        for v in speeds_a[1..].iter() {
            assert_abs_diff_eq!(*v, 10.1, epsilon = 1e-12);
        }
        for v in speeds_b[1..].iter() {
            assert_abs_diff_eq!(*v, 9.9, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_concurrent_sessions() {
        let handles: Vec<_> = [(0.5, 1.0), (-0.5, -1.0), (0.1, 0.0)]
            .iter()
            .enumerate()
            .map(|(i, &(steer, throttle))| thread::spawn(move || {
                let (mut s, _) = session(&format!("thread{}", i), steer, throttle);
                s.on_connect();
                for _ in 0..50 {
                    s.handle(&telemetry_frame(5.0)).unwrap();
                    assert_abs_diff_eq!(s.last_actuation().steering_angle, steer, epsilon = 1e-12);
                    assert_abs_diff_eq!(s.last_actuation().throttle, throttle);
                }
            }))
            .collect();

        for h in handles {
            h.join().unwrap();
        }
    }
}
