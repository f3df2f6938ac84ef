//! Main MPC bridge executable entry point.
//!
//! # Architecture
//!
//! The executable sits between the driving simulator and the solver:
//!
//!     - Initialise the session, logging and parameters
//!     - Bind the simulator endpoint
//!     - For each simulator connection, on its own thread:
//!         - Receive telemetry
//!         - Run the control cycle (latency compensation, reference fit, solve)
//!         - Wait out the actuation latency
//!         - Send the steering command

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::info;
use color_eyre::{Report, eyre::WrapErr};
use structopt::StructOpt;

// Internal
use comms_if::net::NetParams;
use mpc_lib::{
    MpcExecParams,
    sim_server::SimServer,
    solver::{PidSolver, Solver}
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session
};

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

/// Bridge between the driving simulator and a model predictive controller.
#[derive(Debug, StructOpt)]
#[structopt(name = "mpc_exec")]
struct Opt {
    /// Endpoint to listen on, overrides `bind_endpoint` in `net.toml`
    #[structopt(short, long)]
    endpoint: Option<String>,

    /// Log debug and trace messages
    #[structopt(short, long)]
    verbose: bool
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {

    color_eyre::install()?;

    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new(
        "mpc_exec", 
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    let level = if opt.verbose { LevelFilter::Trace } else { LevelFilter::Info };
    logger_init(level, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("MPC Bridge Executable\n");
    info!("Running on: {}", host::get_platform());
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let mut net_params: NetParams = util::params::load(
        "net.toml"
    ).wrap_err("Could not load net params")?;

    if let Some(endpoint) = opt.endpoint {
        info!("Endpoint overriden from the command line");
        net_params.bind_endpoint = endpoint;
    }

    let exec_params: MpcExecParams = util::params::load(
        "mpc_exec.toml"
    ).wrap_err("Could not load exec params")?;

    info!("Exec parameters loaded");
    info!("    Latency: {} s", exec_params.control.latency_s);
    info!(
        "    Vehicle: Lf = {} m, max steer = {} deg", 
        exec_params.control.lf_m, 
        exec_params.control.max_steer_deg
    );

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let solver_params = exec_params.solver.clone();
    let solver_control = exec_params.control.clone();

    let mut server = SimServer::new(
        &net_params,
        exec_params.control,
        move || -> Box<dyn Solver> {
            Box::new(PidSolver::new(solver_params.clone(), &solver_control))
        }
    ).wrap_err("Failed to start the simulator server")?;

    info!("Waiting for the simulator on {}\n", server.endpoint());

    // ---- MAIN LOOP ----

    server.run();

    Ok(())
}
