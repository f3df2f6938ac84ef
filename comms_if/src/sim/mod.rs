//! # Simulator messages module
//!
//! This module defines the messages exchanged with the driving simulator. The simulator speaks
//! a socket.io style protocol over a websocket: every event frame starts with the `42` tag
//! (engine message, socket event) followed by a JSON array `[event_name, data]`.
//!
//! Inbound the only event of interest is `telemetry`. A frame whose payload is missing (or which
//! contains a `null`) means the simulator is being driven manually and must be acknowledged with
//! the `manual` event. Outbound the bridge sends `steer` events.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Serialize, Deserialize};
use serde_json::{self, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Tag that prefixes every event frame.
pub const EVENT_TAG: &str = "42";

/// Name of the inbound telemetry event.
pub const TELEMETRY_EVENT: &str = "telemetry";

/// Name of the outbound steering event.
pub const STEER_EVENT: &str = "steer";

/// Name of the outbound manual driving acknowledgement.
pub const MANUAL_EVENT: &str = "manual";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Telemetry sent by the simulator once per frame.
///
/// All positions are in the simulator's map (world) frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// X coordinates of the reference waypoints
    pub ptsx: Vec<f64>,

    /// Y coordinates of the reference waypoints
    pub ptsy: Vec<f64>,

    /// X position of the vehicle
    pub x: f64,

    /// Y position of the vehicle
    pub y: f64,

    /// Heading of the vehicle in radians
    pub psi: f64,

    /// Speed of the vehicle, in the simulator's native units
    pub speed: f64
}

/// Steering command sent back to the simulator.
///
/// Trajectories are expressed in the vehicle frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SteerCmd {
    /// Steering demand, normalised to [-1, 1]
    pub steering_angle: f64,

    /// Throttle demand
    pub throttle: f64,

    /// X coordinates of the optimiser's predicted trajectory (drawn in green)
    pub mpc_x: Vec<f64>,

    /// Y coordinates of the optimiser's predicted trajectory
    pub mpc_y: Vec<f64>,

    /// X coordinates of the fitted reference line (drawn in yellow)
    pub next_x: Vec<f64>,

    /// Y coordinates of the fitted reference line
    pub next_y: Vec<f64>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SimFrame {
    /// The frame is not an event frame (engine ping, handshake, etc.) and needs no reply.
    NotEvent,

    /// The frame carries no data, the simulator is in manual mode.
    Manual,

    /// A telemetry event with its raw data object.
    Telemetry(Value),

    /// Any other event, carrying its name.
    Other(String)
}

/// Reply to an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Steer(SteerCmd),
    Manual
}

/// Possible parsing errors.
#[derive(Debug, Error)]
pub enum SimParseError {
    #[error("Frame contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("Frame payload is not an [event, data] array")]
    NotAnEventArray,

    #[error("Telemetry is missing a field or has a field of the wrong type: {0}")]
    InvalidTelemetry(serde_json::Error),

    #[error("Waypoint arrays have different lengths ({0} x values, {1} y values)")]
    WaypointLengthMismatch(usize, usize),

    #[error("At least 2 waypoints are required, found {0}")]
    TooFewWaypoints(usize),

    #[error("Telemetry field {0} is not a finite number")]
    NonFinite(&'static str)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimFrame {
    /// Parse an inbound text frame.
    pub fn parse(frame: &str) -> Result<Self, SimParseError> {
        // Only event frames are of interest
        if frame.len() <= EVENT_TAG.len() || !frame.starts_with(EVENT_TAG) {
            return Ok(SimFrame::NotEvent)
        }

        let payload = match extract_payload(frame) {
            Some(p) => p,
            None => return Ok(SimFrame::Manual)
        };

        let value: Value = serde_json::from_str(payload)
            .map_err(SimParseError::InvalidJson)?;

        // Split the event array
        let mut items = match value {
            Value::Array(a) => a.into_iter(),
            _ => return Err(SimParseError::NotAnEventArray)
        };

        let name = match items.next() {
            Some(Value::String(s)) => s,
            _ => return Err(SimParseError::NotAnEventArray)
        };

        if name == TELEMETRY_EVENT {
            Ok(SimFrame::Telemetry(items.next().unwrap_or(Value::Null)))
        }
        else {
            Ok(SimFrame::Other(name))
        }
    }
}

impl Telemetry {
    /// Build and validate telemetry from the data object of a telemetry event.
    pub fn from_value(data: Value) -> Result<Self, SimParseError> {
        let tm: Telemetry = serde_json::from_value(data)
            .map_err(SimParseError::InvalidTelemetry)?;

        tm.validate()?;

        Ok(tm)
    }

    /// Check the telemetry is usable by the controller.
    pub fn validate(&self) -> Result<(), SimParseError> {
        if self.ptsx.len() != self.ptsy.len() {
            return Err(SimParseError::WaypointLengthMismatch(self.ptsx.len(), self.ptsy.len()))
        }

        if self.ptsx.len() < 2 {
            return Err(SimParseError::TooFewWaypoints(self.ptsx.len()))
        }

        let scalars = [
            ("x", self.x), 
            ("y", self.y), 
            ("psi", self.psi), 
            ("speed", self.speed)
        ];
        for (name, val) in scalars.iter() {
            if !val.is_finite() {
                return Err(SimParseError::NonFinite(*name))
            }
        }

        if self.ptsx.iter().chain(self.ptsy.iter()).any(|p| !p.is_finite()) {
            return Err(SimParseError::NonFinite("ptsx/ptsy"))
        }

        Ok(())
    }
}

impl Reply {
    /// Serialize the reply into a complete outbound frame, including the event tag.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        let body = match self {
            Reply::Steer(cmd) => serde_json::to_string(&(STEER_EVENT, cmd))?,
            Reply::Manual => serde_json::to_string(
                &(MANUAL_EVENT, serde_json::Map::new())
            )?
        };

        Ok(format!("{}{}", EVENT_TAG, body))
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the JSON payload of an event frame.
///
/// The payload runs from the first `[` to the last `}]`. Frames containing `null` anywhere are
/// treated as having no payload, which is how the simulator signals manual driving.
pub fn extract_payload(frame: &str) -> Option<&str> {
    if frame.contains("null") {
        return None
    }

    let start = frame.find('[')?;
    let end = frame.rfind("}]")?;

    if end < start {
        return None
    }

    Some(&frame[start..end + 2])
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
