//! # Polynomial fitting
//!
//! Least-squares fit of a polynomial to a small set of points, and evaluation of the result.
//!
//! Coefficients are stored lowest power first, i.e. `coeffs[i]` multiplies `x^i`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{DMatrix, DVector};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Relative size under which a diagonal element of R is treated as zero, making the design matrix
/// rank deficient.
const RANK_TOLERANCE: f64 = 1e-10;

// ---------------------------------------------------------------------------
// TYPES
// ---------------------------------------------------------------------------

/// Polynomial coefficients, lowest power first.
pub type PolyCoeffs = DVector<f64>;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Reasons a fit cannot be made.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PolyFitError {
    #[error("A polynomial of order {order} needs at least {} points, found {num_points}", .order + 1)]
    NotEnoughPoints {
        num_points: usize,
        order: usize
    },

    #[error("Found {0} x values but {1} y values")]
    LengthMismatch(usize, usize),

    #[error("The design matrix is rank deficient (waypoints do not span enough distinct x values)")]
    RankDeficient,

    #[error("The fitted polynomial is not finite")]
    NonFinite
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Fit a polynomial of the given order to the points `(xs[i], ys[i])`.
///
/// The fit minimises the squared residual in y, solving the Vandermonde system with a Householder
/// QR decomposition.
pub fn fit(xs: &[f64], ys: &[f64], order: usize) -> Result<PolyCoeffs, PolyFitError> {
    if xs.len() != ys.len() {
        return Err(PolyFitError::LengthMismatch(xs.len(), ys.len()))
    }

    let num_points = xs.len();
    if num_points < order + 1 {
        return Err(PolyFitError::NotEnoughPoints {
            num_points,
            order
        })
    }

    // Build the design matrix, each row is [1, x, x^2, ..., x^order]
    let mut a = DMatrix::<f64>::zeros(num_points, order + 1);
    for (j, x) in xs.iter().enumerate() {
        a[(j, 0)] = 1.0;
        for i in 0..order {
            a[(j, i + 1)] = a[(j, i)] * x;
        }
    }

    let b = DVector::from_column_slice(ys);

    let qr = a.qr();
    let r = qr.r();

    // Check the rank of R before solving
    let diag_max = r.diagonal().amax();
    if diag_max == 0.0 || r.diagonal().iter().any(|d| d.abs() <= RANK_TOLERANCE * diag_max) {
        return Err(PolyFitError::RankDeficient)
    }

    // Solve R c = Q^T b
    let qtb = qr.q().transpose() * b;

    let coeffs = r.solve_upper_triangular(&qtb)
        .ok_or(PolyFitError::RankDeficient)?;

    if coeffs.iter().any(|c| !c.is_finite()) {
        return Err(PolyFitError::NonFinite)
    }

    Ok(coeffs)
}

/// Evaluate the polynomial at `x`.
pub fn evaluate(coeffs: &PolyCoeffs, x: f64) -> f64 {
    coeffs.as_slice().iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Evaluate the first derivative of the polynomial at `x`.
pub fn derivative_at(coeffs: &PolyCoeffs, x: f64) -> f64 {
    coeffs.as_slice()
        .iter()
        .enumerate()
        .skip(1)
        .rev()
        .fold(0.0, |acc, (i, c)| acc * x + (i as f64) * c)
}

/// The slope of the polynomial at `x = 0`, which is just the order 1 coefficient.
pub fn slope_at_zero(coeffs: &PolyCoeffs) -> f64 {
    if coeffs.len() > 1 {
        coeffs[1]
    }
    else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
