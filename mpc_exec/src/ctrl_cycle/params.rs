//! Parameters structure for the control cycle

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;
use util::maths::deg_to_rad;

use super::CycleInitError;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the control cycle.
///
/// These are fixed for the lifetime of the process and shared read-only by every connection.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlParams {

    // ---- TIMING ----

    /// Time between the telemetry being sampled and the resulting command being applied. The pose
    /// is projected forward by this much, and the bridge waits this long before replying.
    ///
    /// Units: seconds
    pub latency_s: f64,

    // ---- VEHICLE ----

    /// Distance between the vehicle's centre of gravity and its front axle.
    ///
    /// Units: meters
    pub lf_m: f64,

    /// Maximum steering angle either side of centre.
    ///
    /// Units: degrees
    pub max_steer_deg: f64,

    // ---- REFERENCE ----

    /// Order of the polynomial fitted to the waypoints
    pub poly_order: usize,

    /// Spacing along the vehicle X axis of the reference line points sent for display.
    ///
    /// Units: meters
    pub ref_spacing_m: f64,

    /// Number of reference line points sent for display
    pub ref_num_points: usize
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for ControlParams {
    fn default() -> Self {
        Self {
            latency_s: 0.1,
            lf_m: 2.67,
            max_steer_deg: 25.0,
            poly_order: 3,
            ref_spacing_m: 2.5,
            ref_num_points: 24
        }
    }
}

impl ControlParams {
    /// Maximum steering angle in radians.
    pub fn max_steer_rad(&self) -> f64 {
        deg_to_rad(self.max_steer_deg)
    }

    /// Divisor which maps the solver's steering output into the normalised [-1, 1] range.
    pub fn steer_norm_factor(&self) -> f64 {
        self.max_steer_rad() * self.lf_m
    }

    /// Check the parameters describe a usable controller.
    pub fn validate(&self) -> Result<(), CycleInitError> {
        if !(self.latency_s >= 0.0) || !self.latency_s.is_finite() {
            return Err(CycleInitError::InvalidParam("latency_s", self.latency_s))
        }
        if !(self.lf_m > 0.0) || !self.lf_m.is_finite() {
            return Err(CycleInitError::InvalidParam("lf_m", self.lf_m))
        }
        if !(self.max_steer_deg > 0.0) || self.max_steer_deg >= 90.0 {
            return Err(CycleInitError::InvalidParam("max_steer_deg", self.max_steer_deg))
        }
        if self.poly_order < 1 {
            return Err(CycleInitError::InvalidParam("poly_order", self.poly_order as f64))
        }
        if !(self.ref_spacing_m > 0.0) || !self.ref_spacing_m.is_finite() {
            return Err(CycleInitError::InvalidParam("ref_spacing_m", self.ref_spacing_m))
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
