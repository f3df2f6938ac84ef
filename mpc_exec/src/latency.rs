//! # Latency compensation
//!
//! The command computed for a telemetry frame only reaches the actuators one latency interval
//! later. The pose the optimiser works from is therefore projected forward over that interval
//! with a simple kinematic bicycle model, driven by the last command sent (the new one is not
//! known yet).

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Planar pose of the vehicle in the world frame.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize)]
pub struct Pose {
    pub x: f64,

    pub y: f64,

    /// Heading, radians anticlockwise from the world X axis
    pub psi: f64
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Project a pose and speed forward by `dt` seconds.
///
/// - `x' = x + v cos(psi) dt`
/// - `y' = y + v sin(psi) dt`
/// - `psi' = psi + (v / lf) steering dt`
/// - `v' = v + throttle dt`
///
/// `lf_m` is the distance between the vehicle's centre of gravity and its front axle.
pub fn project(
    pose: &Pose,
    speed: f64,
    last_steering: f64,
    last_throttle: f64,
    dt: f64,
    lf_m: f64
) -> (Pose, f64) {
    let projected = Pose {
        x: pose.x + speed * pose.psi.cos() * dt,
        y: pose.y + speed * pose.psi.sin() * dt,
        psi: pose.psi + (speed / lf_m) * last_steering * dt
    };

    (projected, speed + last_throttle * dt)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_zero_dt_is_identity() {
        let cases = [
            (Pose { x: 0.0, y: 0.0, psi: 0.0 }, 0.0, 0.0, 0.0),
            (Pose { x: 12.3, y: -4.5, psi: 2.1 }, 30.0, 0.8, -1.0),
            (Pose { x: -1e4, y: 7e3, psi: -6.0 }, 120.0, -1.0, 1.0)
        ];

        for (pose, speed, steer, throttle) in cases.iter() {
            let (p, v) = project(pose, *speed, *steer, *throttle, 0.0, 2.67);
            assert_eq!(p, *pose);
            assert_eq!(v, *speed);
        }
    }

    #[test]
    fn test_projection() {
        let pose = Pose { x: 1.0, y: 2.0, psi: FRAC_PI_2 };

        let (p, v) = project(&pose, 10.0, 0.5, 0.2, 0.1, 2.5);

        // Heading +Y so only y moves
        assert_abs_diff_eq!(p.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.y, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.psi, FRAC_PI_2 + 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(v, 10.02, epsilon = 1e-12);
    }

    #[test]
    fn test_stationary_vehicle() {
        // No speed, so only the throttle has any effect
        let pose = Pose { x: 5.0, y: 5.0, psi: 1.0 };

        let (p, v) = project(&pose, 0.0, 1.0, 1.0, 0.1, 2.67);

        assert_eq!(p, pose);
        assert_abs_diff_eq!(v, 0.1, epsilon = 1e-12);
    }
}
