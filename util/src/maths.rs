//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;
use std::f64::consts::{PI, TAU};

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Clamp a value into the range `[min, max]`.
pub fn clamp<T>(value: &T, min: &T, max: &T) -> T 
where
    T: Float
{
    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}

/// Convert an angle in degrees into radians.
pub fn deg_to_rad<T>(value: T) -> T
where
    T: Float
{
    value.to_radians()
}

/// Wrap an angle into the range `[-pi, pi)`.
pub fn wrap_pi(value: f64) -> f64 {
    let r = (value + PI) % TAU;
    if r < 0.0 { r + TAU - PI } else { r - PI }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
