//! # Cubic spline fitting
//!
//! Natural cubic splines used to turn a sparse waypoint sequence into a
//! smooth, arc-length-parameterised course. A 1D spline interpolates one
//! coordinate against the parameter; the 2D spline pairs two of them against
//! the cumulative chord length so that position, heading and curvature can
//! all be evaluated at any distance along the curve.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use thiserror::Error;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A natural cubic spline through a set of knots.
///
/// Within segment `i` the spline value is
/// `a[i] + b[i]*dx + c[i]*dx^2 + d[i]*dx^3` with `dx = s - knot[i]`.
/// Natural boundary conditions are used: the second derivative is zero at
/// both ends.
#[derive(Debug, Clone)]
pub struct CubicSpline1d {
    /// Knot positions, strictly ascending
    knots: Vec<f64>,

    /// Constant coefficients (the knot values)
    a: Vec<f64>,

    /// Linear coefficients, one per segment
    b: Vec<f64>,

    /// Quadratic coefficients, one per knot
    c: Vec<f64>,

    /// Cubic coefficients, one per segment
    d: Vec<f64>,
}

/// A 2D curve built from a pair of 1D splines over the cumulative chord
/// length of the input points.
#[derive(Debug, Clone)]
pub struct CubicSpline2d {
    /// Cumulative chord length at each input point
    s_m: Vec<f64>,

    /// Spline of x against arc length
    sx: CubicSpline1d,

    /// Spline of y against arc length
    sy: CubicSpline1d,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors that can occur when fitting a spline.
#[derive(Debug, Error)]
pub enum SplineError {
    #[error("At least 2 points are needed to fit a spline, got {0}")]
    TooFewPoints(usize),

    #[error("Knot and value slices have different lengths ({0} vs {1})")]
    LengthMismatch(usize, usize),

    #[error(
        "Knots must be strictly ascending, but knot {0} is not greater than \
         its predecessor (duplicate or out-of-order waypoint)"
    )]
    NotAscending(usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CubicSpline1d {
    /// Fit a natural cubic spline through the given knot/value pairs.
    ///
    /// The knots must be strictly ascending. Solving for the quadratic
    /// coefficients requires one linear solve; the system is tridiagonal and
    /// diagonally dominant (segment lengths are positive), so a direct
    /// Thomas solve is used rather than a general dense solver.
    pub fn new(knots: Vec<f64>, values: Vec<f64>) -> Result<Self, SplineError> {
        let n = knots.len();

        if n < 2 {
            return Err(SplineError::TooFewPoints(n));
        }
        if values.len() != n {
            return Err(SplineError::LengthMismatch(n, values.len()));
        }

        // Segment lengths, checking ascending order as we go
        let mut h = Vec::with_capacity(n - 1);
        for i in 1..n {
            let hi = knots[i] - knots[i - 1];
            if hi <= 0.0 {
                return Err(SplineError::NotAscending(i));
            }
            h.push(hi);
        }

        let a = values;

        // Build the tridiagonal system for the quadratic coefficients c.
        // First and last rows encode the natural boundary condition c = 0.
        let mut lower = vec![0.0; n - 1];
        let mut diag = vec![1.0; n];
        let mut upper = vec![0.0; n - 1];
        let mut rhs = vec![0.0; n];

        for i in 1..n - 1 {
            lower[i - 1] = h[i - 1];
            diag[i] = 2.0 * (h[i - 1] + h[i]);
            upper[i] = h[i];
            rhs[i] = 3.0 * ((a[i + 1] - a[i]) / h[i] - (a[i] - a[i - 1]) / h[i - 1]);
        }

        // Diagonal dominance guarantees non-zero pivots here
        let c = solve_tridiagonal(&lower, &diag, &upper, &rhs);

        // Back out the linear and cubic coefficients per segment
        let mut b = Vec::with_capacity(n - 1);
        let mut d = Vec::with_capacity(n - 1);
        for i in 0..n - 1 {
            d.push((c[i + 1] - c[i]) / (3.0 * h[i]));
            b.push((a[i + 1] - a[i]) / h[i] - h[i] / 3.0 * (2.0 * c[i] + c[i + 1]));
        }

        Ok(Self { knots, a, b, c, d })
    }

    /// Evaluate the spline at `s`.
    ///
    /// Returns `None` if `s` lies outside the knot range. Callers must not
    /// substitute an extrapolated value in that case.
    pub fn position(&self, s: f64) -> Option<f64> {
        let i = self.segment_index(s)?;
        let dx = s - self.knots[i];
        Some(self.a[i] + self.b[i] * dx + self.c[i] * dx.powi(2) + self.d[i] * dx.powi(3))
    }

    /// Evaluate the first derivative at `s`, or `None` outside the domain.
    pub fn first_deriv(&self, s: f64) -> Option<f64> {
        let i = self.segment_index(s)?;
        let dx = s - self.knots[i];
        Some(self.b[i] + 2.0 * self.c[i] * dx + 3.0 * self.d[i] * dx.powi(2))
    }

    /// Evaluate the second derivative at `s`, or `None` outside the domain.
    pub fn second_deriv(&self, s: f64) -> Option<f64> {
        let i = self.segment_index(s)?;
        let dx = s - self.knots[i];
        Some(2.0 * self.c[i] + 6.0 * self.d[i] * dx)
    }

    /// Find the segment containing `s`, or `None` if `s` is out of domain.
    fn segment_index(&self, s: f64) -> Option<usize> {
        if s < self.knots[0] || s > *self.knots.last().expect("spline has at least 2 knots") {
            return None;
        }

        // partition_point gives the first knot greater than s; the segment is
        // the one before it. Evaluating exactly at the final knot uses the
        // last segment.
        let i = self.knots.partition_point(|&k| k <= s);
        Some(i.saturating_sub(1).min(self.knots.len() - 2))
    }
}

impl CubicSpline2d {
    /// Fit a 2D curve through the given points, parameterised by cumulative
    /// chord length.
    ///
    /// Duplicate consecutive points produce a zero-length chord and are
    /// rejected, as they would break the arc-length parameterisation.
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self, SplineError> {
        if x.len() != y.len() {
            return Err(SplineError::LengthMismatch(x.len(), y.len()));
        }
        if x.len() < 2 {
            return Err(SplineError::TooFewPoints(x.len()));
        }

        // Cumulative chord length
        let mut s_m = Vec::with_capacity(x.len());
        s_m.push(0.0);
        for i in 1..x.len() {
            let ds = (x[i] - x[i - 1]).hypot(y[i] - y[i - 1]);
            s_m.push(s_m[i - 1] + ds);
        }

        let sx = CubicSpline1d::new(s_m.clone(), x.to_vec())?;
        let sy = CubicSpline1d::new(s_m.clone(), y.to_vec())?;

        Ok(Self { s_m, sx, sy })
    }

    /// Total chord length of the curve in meters.
    pub fn end_s_m(&self) -> f64 {
        *self.s_m.last().expect("curve has at least 2 points")
    }

    /// Evaluate the position at arc length `s_m`, or `None` outside the
    /// domain.
    pub fn position(&self, s_m: f64) -> Option<(f64, f64)> {
        Some((self.sx.position(s_m)?, self.sy.position(s_m)?))
    }

    /// Evaluate the heading (tangent angle) at arc length `s_m`, or `None`
    /// outside the domain.
    pub fn yaw(&self, s_m: f64) -> Option<f64> {
        let dx = self.sx.first_deriv(s_m)?;
        let dy = self.sy.first_deriv(s_m)?;
        Some(dy.atan2(dx))
    }

    /// Evaluate the signed curvature at arc length `s_m`, or `None` outside
    /// the domain.
    pub fn curvature(&self, s_m: f64) -> Option<f64> {
        let dx = self.sx.first_deriv(s_m)?;
        let ddx = self.sx.second_deriv(s_m)?;
        let dy = self.sy.first_deriv(s_m)?;
        let ddy = self.sy.second_deriv(s_m)?;
        Some((ddy * dx - ddx * dy) / (dx.powi(2) + dy.powi(2)).powf(1.5))
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Solve a tridiagonal system with the Thomas algorithm.
///
/// `lower` and `upper` hold the sub/super diagonals (length n-1), `diag` and
/// `rhs` the main diagonal and right hand side (length n). The spline system
/// is diagonally dominant so no pivoting is required.
fn solve_tridiagonal(lower: &[f64], diag: &[f64], upper: &[f64], rhs: &[f64]) -> Vec<f64> {
    let n = diag.len();
    let mut c_prime = vec![0.0; n];
    let mut d_prime = vec![0.0; n];

    c_prime[0] = upper.first().copied().unwrap_or(0.0) / diag[0];
    d_prime[0] = rhs[0] / diag[0];

    for i in 1..n {
        let m = diag[i] - lower[i - 1] * c_prime[i - 1];
        if i < n - 1 {
            c_prime[i] = upper[i] / m;
        }
        d_prime[i] = (rhs[i] - lower[i - 1] * d_prime[i - 1]) / m;
    }

    // Back substitution
    let mut x = vec![0.0; n];
    x[n - 1] = d_prime[n - 1];
    for i in (0..n - 1).rev() {
        x[i] = d_prime[i] - c_prime[i] * x[i + 1];
    }

    x
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
