//! # Frame transforms
//!
//! Conversion of waypoints between the simulator's map (world) frame and the vehicle frame. The
//! vehicle frame has its origin at the vehicle, X along the vehicle heading and Y to the left.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Point2, Rotation2, Vector2};

// ---------------------------------------------------------------------------
// TYPES
// ---------------------------------------------------------------------------

/// An ordered set of waypoints.
pub type WaypointSet = Vec<Point2<f64>>;

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Transform world frame waypoints into the frame of a vehicle at `(x, y)` with heading `psi`.
///
/// Each point is translated by `(-x, -y)` then rotated by `-psi`.
pub fn to_vehicle_frame(
    waypoints: &[Point2<f64>], 
    x: f64, 
    y: f64, 
    psi: f64
) -> WaypointSet {
    let rot = Rotation2::new(-psi);
    let shift = Vector2::new(x, y);

    waypoints.iter()
        .map(|p| rot * (p - shift))
        .collect()
}

/// Transform vehicle frame points back into the world frame, the inverse of
/// [`to_vehicle_frame`].
pub fn to_world_frame(
    points: &[Point2<f64>], 
    x: f64, 
    y: f64, 
    psi: f64
) -> WaypointSet {
    let rot = Rotation2::new(psi);
    let shift = Vector2::new(x, y);

    points.iter()
        .map(|p| rot * p + shift)
        .collect()
}

/// Zip separate coordinate arrays into points. Extra values in the longer array are ignored.
pub fn from_xy(xs: &[f64], ys: &[f64]) -> WaypointSet {
    xs.iter()
        .zip(ys.iter())
        .map(|(x, y)| Point2::new(*x, *y))
        .collect()
}

/// Split points into separate coordinate arrays.
pub fn split_xy(points: &[Point2<f64>]) -> (Vec<f64>, Vec<f64>) {
    points.iter()
        .map(|p| (p.x, p.y))
        .unzip()
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_identity_pose() {
        let wps = from_xy(&[10.0, 20.0, 30.0, 40.0], &[0.0; 4]);

        let veh = to_vehicle_frame(&wps, 0.0, 0.0, 0.0);

        assert_eq!(veh, wps);
    }

    #[test]
    fn test_known_transform() {
        // Vehicle at (1, 1) facing +Y, a point 2 units further along +Y is straight ahead
        let veh = to_vehicle_frame(&[Point2::new(1.0, 3.0)], 1.0, 1.0, FRAC_PI_2);
        assert_abs_diff_eq!(veh[0].x, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(veh[0].y, 0.0, epsilon = 1e-12);

        // A point at +X in the world is then on the vehicle's right
        let veh = to_vehicle_frame(&[Point2::new(2.0, 1.0)], 1.0, 1.0, FRAC_PI_2);
        assert_abs_diff_eq!(veh[0].x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(veh[0].y, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip() {
        let wps = from_xy(
            &[-31.2, 14.7, 120.3, 0.0, 5.5],
            &[102.0, -8.1, 33.3, 0.0, -77.0]
        );

        let poses = [
            (0.0, 0.0, 0.0),
            (12.5, -3.0, 0.7),
            (-140.2, 88.8, -2.9),
            (3.0, 4.0, PI),
            (1e3, -1e3, 7.5)
        ];

        for (x, y, psi) in poses.iter() {
            let veh = to_vehicle_frame(&wps, *x, *y, *psi);
            let back = to_world_frame(&veh, *x, *y, *psi);

            for (a, b) in wps.iter().zip(back.iter()) {
                assert_abs_diff_eq!(a.x, b.x, epsilon = 1e-9);
                assert_abs_diff_eq!(a.y, b.y, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_split_xy() {
        let (xs, ys) = split_xy(&from_xy(&[1.0, 2.0, 3.0], &[4.0, 5.0]));
        assert_eq!(xs, vec![1.0, 2.0]);
        assert_eq!(ys, vec![4.0, 5.0]);
    }
}
