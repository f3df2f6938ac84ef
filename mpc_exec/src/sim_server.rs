//! # Simulator server
//!
//! Accepts connections from the simulator and runs one handler thread per connection. Each handler
//! completes the websocket handshake, then owns its link and its [`SimSession`], processing frames
//! strictly in order: receive, handle, wait out the actuation latency, send.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration
};
use log::{debug, info, trace, warn};

// Internal
use comms_if::{
    net::{self, NetError, NetParams, SimLink, WsListener, HANDSHAKE_TIMEOUT},
    sim::Reply
};
use util::module::State;
use crate::{
    ctrl_cycle::{ControlCycle, ControlParams, CycleInitError},
    sim_session::SimSession,
    solver::Solver
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Pause after the listener fails to accept, so a persistent failure (e.g. out of file
/// descriptors) does not spin the accept loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Builds a fresh solver for each connection.
pub type SolverFactory = Arc<dyn Fn() -> Box<dyn Solver> + Send + Sync>;

/// The bridge's server.
pub struct SimServer {
    listener: WsListener,

    control: ControlParams,

    solver_factory: SolverFactory,

    /// Number of connections accepted so far
    num_conns: usize
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Network error: {0}")]
    NetError(#[from] NetError),

    #[error("Invalid control parameters: {0}")]
    InvalidParams(#[from] CycleInitError),

    #[error("Could not spawn the connection handler thread: {0}")]
    SpawnError(std::io::Error)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimServer {
    /// Bind the server's endpoint.
    pub fn new<F>(
        net_params: &NetParams, 
        control: ControlParams, 
        solver_factory: F
    ) -> Result<Self, ServerError>
    where
        F: Fn() -> Box<dyn Solver> + Send + Sync + 'static
    {
        control.validate()?;

        let listener = WsListener::bind(net_params)?;
        info!("Listening for the simulator on {}", listener.endpoint());

        Ok(Self {
            listener,
            control,
            solver_factory: Arc::new(solver_factory),
            num_conns: 0
        })
    }

    /// The endpoint the server is listening on.
    pub fn endpoint(&self) -> &str {
        self.listener.endpoint()
    }

    /// Wait for one connection and start its handler thread.
    ///
    /// The handshake runs on the handler thread, so a peer which stalls during it only holds up
    /// its own connection.
    pub fn serve_one(&mut self) -> Result<JoinHandle<()>, ServerError> {
        let (stream, addr) = self.listener.accept()?;
        self.num_conns += 1;

        let id = format!("{}#{}", addr, self.num_conns);

        let mut cycle = ControlCycle::new((self.solver_factory)());
        cycle.init(self.control.clone())?;
        let mut session = SimSession::new(id.clone(), cycle);

        let delay = Duration::from_secs_f64(self.control.latency_s);

        thread::Builder::new()
            .name(id)
            .spawn(move || {
                let mut link = match net::handshake(stream, HANDSHAKE_TIMEOUT) {
                    Ok(l) => l,
                    Err(e) => {
                        warn!("[{}] Connection dropped: {}", session.id(), e);
                        return
                    }
                };

                if let Err(e) = run_connection(&mut link, &mut session, delay) {
                    warn!("[{}] Connection ended with an error: {}", session.id(), e);
                }
            })
            .map_err(ServerError::SpawnError)
    }

    /// Serve connections forever.
    ///
    /// Failing to accept a connection only drops that connection.
    pub fn run(&mut self) {
        loop {
            if let Err(e) = self.serve_one() {
                warn!("Could not serve a connection: {}", e);

                if let Some(pause) = backoff_after(&e) {
                    thread::sleep(pause);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Handle a connection until it closes.
///
/// Steering replies are held back by `delay` to model the actuation latency. If the link closes
/// in the meantime the send fails with `ConnectionClosed` and the reply is dropped. Frames which
/// fail to produce a command are logged and skipped, only a failure of the link itself ends the
/// connection with an error.
pub fn run_connection<L: SimLink>(
    link: &mut L, 
    session: &mut SimSession, 
    delay: Duration
) -> Result<(), NetError> {
    session.on_connect();

    let result = loop {
        let frame = match link.recv_text() {
            Ok(Some(f)) => f,
            Ok(None) => continue,
            Err(NetError::ConnectionClosed) => break Ok(()),
            Err(e) => break Err(e)
        };

        let reply = match session.handle(&frame) {
            Ok(Some(r)) => r,
            Ok(None) => continue,
            Err(e) => {
                warn!("[{}] Cycle skipped: {}", session.id(), e);
                continue
            }
        };

        let text = match reply.to_frame() {
            Ok(t) => t,
            Err(e) => {
                warn!("[{}] Could not serialize the reply: {}", session.id(), e);
                continue
            }
        };

        if let Reply::Steer(_) = reply {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }

        trace!("[{}] -> {}", session.id(), text);

        match link.send_text(&text) {
            Ok(()) => (),
            Err(NetError::ConnectionClosed) => {
                debug!("[{}] Link closed before the reply was sent, reply dropped", session.id());
                break Ok(())
            },
            Err(e) => break Err(e)
        }
    };

    link.close();
    session.on_disconnect();

    result
}

/// How long the accept loop should wait after the given error, if at all.
fn backoff_after(e: &ServerError) -> Option<Duration> {
    match e {
        ServerError::NetError(NetError::AcceptError(_)) => Some(ACCEPT_BACKOFF),
        _ => None
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::{collections::VecDeque, io, net::TcpStream, time::Instant};
    use comms_if::{
        net,
        sim::{SimFrame, SteerCmd}
    };
    use crate::{
        ctrl_cycle::Actuation,
        poly_fit::PolyCoeffs,
        sim_session::SessionState,
        solver::{ControllerState, PidSolver, PidSolverParams, SolverError}
    };

    /// An in-memory link.
    struct MockLink {
        inbound: VecDeque<String>,

        sent: Vec<String>,

        connected: bool,

        /// Disconnect once this many frames have been received
        drop_after: Option<usize>,

        num_recv: usize
    }

    impl MockLink {
        fn new(frames: &[&str]) -> Self {
            Self {
                inbound: frames.iter().map(|f| f.to_string()).collect(),
                sent: Vec::new(),
                connected: true,
                drop_after: None,
                num_recv: 0
            }
        }
    }

    impl SimLink for MockLink {
        fn recv_text(&mut self) -> Result<Option<String>, NetError> {
            if !self.connected {
                return Err(NetError::ConnectionClosed)
            }

            match self.inbound.pop_front() {
                Some(f) => {
                    self.num_recv += 1;
                    if self.drop_after == Some(self.num_recv) {
                        self.connected = false;
                    }
                    Ok(Some(f))
                },
                None => {
                    self.connected = false;
                    Err(NetError::ConnectionClosed)
                }
            }
        }

        fn send_text(&mut self, text: &str) -> Result<(), NetError> {
            if !self.connected {
                return Err(NetError::ConnectionClosed)
            }
            self.sent.push(text.to_owned());
            Ok(())
        }

        fn close(&mut self) {
            self.connected = false;
        }

        fn connected(&self) -> bool {
            self.connected
        }
    }

    fn fixed_session(soln: Vec<f64>) -> SimSession {
        let mut cycle = ControlCycle::new(Box::new(
            move |_: &ControllerState, _: &PolyCoeffs| -> Result<Vec<f64>, SolverError> {
                Ok(soln.clone())
            }
        ));
        cycle.init(ControlParams::default()).unwrap();
        SimSession::new("mock", cycle)
    }

    const TELEMETRY: &str = "42[\"telemetry\",{\"ptsx\":[10,20,30,40],\"ptsy\":[0,0,0,0],\
        \"x\":0,\"y\":0,\"psi\":0,\"speed\":0,\"steering_angle\":0,\"throttle\":0}]";

    const NO_PSI: &str = "42[\"telemetry\",{\"ptsx\":[10,20,30,40],\"ptsy\":[0,0,0,0],\
        \"x\":0,\"y\":0,\"speed\":0}]";

    fn parse_steer(frame: &str) -> SteerCmd {
        match SimFrame::parse(frame).unwrap() {
            SimFrame::Other(name) => assert_eq!(name, "steer"),
            f => panic!("Expected a steer frame, got {:?}", f)
        }
        let payload = comms_if::sim::extract_payload(frame).unwrap();
        let (_, cmd): (String, SteerCmd) = serde_json::from_str(payload).unwrap();
        cmd
    }

    #[test]
    fn test_replies() {
        let mut link = MockLink::new(&[
            TELEMETRY,
            "42[\"telemetry\",null]",
            "2",
            NO_PSI,
            TELEMETRY
        ]);
        let mut session = fixed_session(vec![0.0, 0.4, 1.0, 0.0]);

        run_connection(&mut link, &mut session, Duration::from_millis(0)).unwrap();

        // The malformed frame and the ping get no reply
        assert_eq!(link.sent.len(), 3);
        assert_eq!(link.sent[1], "42[\"manual\",{}]");
        let cmd = parse_steer(&link.sent[0]);
        assert_eq!(cmd.throttle, 0.4);
        assert_eq!(cmd.mpc_x, vec![1.0]);
        assert_eq!(cmd.next_x.len(), 24);
        parse_steer(&link.sent[2]);

        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_reply_dropped_on_disconnect() {
        let mut link = MockLink::new(&[TELEMETRY, TELEMETRY]);
        link.drop_after = Some(1);
        let mut session = fixed_session(vec![0.0, 0.4]);

        run_connection(&mut link, &mut session, Duration::from_millis(0)).unwrap();

        // The cycle still ran, but nothing was sent
        assert!(link.sent.is_empty());
        assert_eq!(link.inbound.len(), 1);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_steer_delay() {
        let mut link = MockLink::new(&[TELEMETRY]);
        let mut session = fixed_session(vec![0.0, 0.0]);

        let start = Instant::now();
        run_connection(&mut link, &mut session, Duration::from_millis(30)).unwrap();

        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(link.sent.len(), 1);
    }

    #[test]
    fn test_reconnect_resets_actuation() {
        let mut session = fixed_session(vec![1.0, 0.5]);

        let mut link = MockLink::new(&[TELEMETRY]);
        run_connection(&mut link, &mut session, Duration::from_millis(0)).unwrap();
        assert_ne!(session.last_actuation(), Actuation::neutral());

        let mut link = MockLink::new(&[]);
        run_connection(&mut link, &mut session, Duration::from_millis(0)).unwrap();
        assert_eq!(session.last_actuation(), Actuation::neutral());
    }

    #[test]
    fn test_server_loopback() {
        let control = ControlParams {
            latency_s: 0.0,
            ..ControlParams::default()
        };
        let solver_control = control.clone();
        let mut server = SimServer::new(
            &NetParams {
                bind_endpoint: "127.0.0.1:0".into()
            },
            control,
            move || -> Box<dyn Solver> {
                Box::new(PidSolver::new(PidSolverParams::default(), &solver_control))
            }
        ).unwrap();
        let url = format!("ws://{}", server.endpoint());

        let handle = thread::spawn(move || {
            for _ in 0..2 {
                server.serve_one().unwrap().join().unwrap();
            }
        });

        // Two connections one after the other, each starting from neutral
        for _ in 0..2 {
            let mut client = net::connect(&url).unwrap();

            client.send_text(TELEMETRY).unwrap();
            let cmd = parse_steer(&client.recv_text().unwrap().unwrap());
            assert!(cmd.steering_angle.abs() <= 1.0);
            assert!(cmd.throttle > 0.0);

            client.send_text("42[\"telemetry\",null]").unwrap();
            assert_eq!(client.recv_text().unwrap().unwrap(), "42[\"manual\",{}]");

            client.close();
        }

        handle.join().unwrap();
    }

    #[test]
    fn test_stalled_handshake() {
        let control = ControlParams {
            latency_s: 0.0,
            ..ControlParams::default()
        };
        let solver_control = control.clone();
        let mut server = SimServer::new(
            &NetParams {
                bind_endpoint: "127.0.0.1:0".into()
            },
            control,
            move || -> Box<dyn Solver> {
                Box::new(PidSolver::new(PidSolverParams::default(), &solver_control))
            }
        ).unwrap();
        let url = format!("ws://{}", server.endpoint());

        // A peer which opens a TCP connection and never upgrades it
        let silent = TcpStream::connect(server.endpoint()).unwrap();

        let handle = thread::spawn(move || {
            let stalled = server.serve_one().unwrap();
            server.serve_one().unwrap().join().unwrap();
            stalled
        });

        // The simulator is still served straight away
        let start = Instant::now();
        let mut client = net::connect(&url).unwrap();
        client.send_text(TELEMETRY).unwrap();
        parse_steer(&client.recv_text().unwrap().unwrap());
        client.close();
        assert!(start.elapsed() < HANDSHAKE_TIMEOUT);

        // Closing the silent peer ends its handler
        drop(silent);
        handle.join().unwrap().join().unwrap();
    }

    #[test]
    fn test_accept_backoff() {
        let accept_err = ServerError::NetError(NetError::AcceptError(
            io::Error::from(io::ErrorKind::Other)
        ));
        assert_eq!(backoff_after(&accept_err), Some(ACCEPT_BACKOFF));

        let handshake_err = ServerError::NetError(NetError::HandshakeError("test".into()));
        assert_eq!(backoff_after(&handshake_err), None);
    }

    #[test]
    fn test_invalid_params() {
        let control = ControlParams {
            latency_s: -1.0,
            ..ControlParams::default()
        };

        let result = SimServer::new(
            &NetParams {
                bind_endpoint: "127.0.0.1:0".into()
            },
            control,
            || -> Box<dyn Solver> {
                Box::new(PidSolver::new(PidSolverParams::default(), &ControlParams::default()))
            }
        );

        assert!(matches!(result, Err(ServerError::InvalidParams(_))));
    }
}
