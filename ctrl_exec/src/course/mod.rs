//! # Course module
//!
//! A course is the sampled reference path the controller tracks. It is built
//! once at startup from an ordered waypoint sequence: the waypoints are
//! fitted with a cubic spline, which is then sampled at a regular arc-length
//! spacing to give position, heading and curvature arrays. A speed profile
//! aligned one-to-one with the samples assigns each one a signed target
//! speed.
//!
//! The course is immutable once built. The controller must not be started
//! with an invalid course, so all validity checks (too few waypoints,
//! duplicate consecutive waypoints) are fatal at construction time.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod profile;
pub mod spline;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::Vector2;
use serde::Serialize;
use std::path::Path;

// Internal
use self::spline::{CubicSpline2d, SplineError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A reference course sampled at regular arc-length spacing.
///
/// All arrays are indexed by sample number. The arc length is strictly
/// increasing and the yaw values are unwrapped, i.e. consecutive samples
/// never differ by a spurious 2pi.
#[derive(Debug, Clone, Serialize)]
pub struct Course {
    /// Sample x positions
    pub x_m: Vec<f64>,

    /// Sample y positions
    pub y_m: Vec<f64>,

    /// Sample headings (unwrapped)
    pub yaw_rad: Vec<f64>,

    /// Sample signed curvatures
    pub curv_per_m: Vec<f64>,

    /// Cumulative arc length at each sample
    pub s_m: Vec<f64>,

    /// The spacing between samples
    pub sep_m: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors that can occur when building or loading a course.
#[derive(Debug, thiserror::Error)]
pub enum CourseError {
    #[error("A course needs at least 2 waypoints, got {0}")]
    TooFewWaypoints(usize),

    #[error("The sample spacing must be positive, got {0}")]
    InvalidSeparation(f64),

    #[error("Could not fit a spline through the waypoints: {0}")]
    SplineFit(#[from] SplineError),

    #[error("Could not read the waypoint file: {0}")]
    WaypointFile(#[from] csv::Error),

    #[error("Waypoint record {0} is not an `x,y` pair")]
    WaypointFormat(usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Course {
    /// Build a course through the given waypoints with the given sample
    /// spacing.
    pub fn from_waypoints(waypoints: &[Vector2<f64>], sep_m: f64) -> Result<Self, CourseError> {
        if waypoints.len() < 2 {
            return Err(CourseError::TooFewWaypoints(waypoints.len()));
        }
        if sep_m <= 0.0 {
            return Err(CourseError::InvalidSeparation(sep_m));
        }

        let wx: Vec<f64> = waypoints.iter().map(|w| w[0]).collect();
        let wy: Vec<f64> = waypoints.iter().map(|w| w[1]).collect();

        let sp = CubicSpline2d::new(&wx, &wy)?;

        // Sample at multiples of the spacing, up to but not including the
        // total arc length. Every sample is therefore strictly inside the
        // spline domain and the evaluations cannot fail.
        let num_samples = (sp.end_s_m() / sep_m).ceil() as usize;

        let mut x_m = Vec::with_capacity(num_samples);
        let mut y_m = Vec::with_capacity(num_samples);
        let mut yaw_rad = Vec::with_capacity(num_samples);
        let mut curv_per_m = Vec::with_capacity(num_samples);
        let mut s_m = Vec::with_capacity(num_samples);

        let mut s = 0.0;
        while s < sp.end_s_m() {
            // In the domain by construction
            let (x, y) = sp.position(s).expect("sample inside spline domain");
            x_m.push(x);
            y_m.push(y);
            yaw_rad.push(sp.yaw(s).expect("sample inside spline domain"));
            curv_per_m.push(sp.curvature(s).expect("sample inside spline domain"));
            s_m.push(s);

            s += sep_m;
        }

        // Unwrap the heading so consecutive samples are locally continuous
        smooth_yaw(&mut yaw_rad);

        Ok(Self {
            x_m,
            y_m,
            yaw_rad,
            curv_per_m,
            s_m,
            sep_m,
        })
    }

    /// Load waypoints from a file of comma-separated `x,y` pairs, one per
    /// line.
    pub fn load_waypoints<P: AsRef<Path>>(path: P) -> Result<Vec<Vector2<f64>>, CourseError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut waypoints = Vec::new();

        for (i, record) in reader.records().enumerate() {
            let record = record?;

            if record.len() != 2 {
                return Err(CourseError::WaypointFormat(i));
            }

            let x: f64 = record[0]
                .parse()
                .map_err(|_| CourseError::WaypointFormat(i))?;
            let y: f64 = record[1]
                .parse()
                .map_err(|_| CourseError::WaypointFormat(i))?;

            waypoints.push(Vector2::new(x, y));
        }

        Ok(waypoints)
    }

    /// Get the number of samples in the course
    pub fn num_points(&self) -> usize {
        self.x_m.len()
    }

    /// Get the position of the sample at the given index
    pub fn point(&self, index: usize) -> Vector2<f64> {
        Vector2::new(self.x_m[index], self.y_m[index])
    }

    /// Get the final sample of the course, which is the goal position
    pub fn goal(&self) -> Vector2<f64> {
        self.point(self.num_points() - 1)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Unwrap a heading sequence in place.
///
/// Whenever the step between consecutive headings exceeds pi/2 the later
/// heading is shifted by whole turns until the step is small again,
/// removing the 2pi discontinuities introduced by atan2.
fn smooth_yaw(yaw_rad: &mut [f64]) {
    use std::f64::consts::{FRAC_PI_2, TAU};

    for i in 0..yaw_rad.len().saturating_sub(1) {
        let mut dyaw = yaw_rad[i + 1] - yaw_rad[i];

        while dyaw >= FRAC_PI_2 {
            yaw_rad[i + 1] -= TAU;
            dyaw = yaw_rad[i + 1] - yaw_rad[i];
        }

        while dyaw <= -FRAC_PI_2 {
            yaw_rad[i + 1] += TAU;
            dyaw = yaw_rad[i + 1] - yaw_rad[i];
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn square_wave_waypoints() -> Vec<Vector2<f64>> {
        vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(10.0, 2.0),
            Vector2::new(20.0, -2.0),
            Vector2::new(30.0, 3.0),
            Vector2::new(40.0, 0.0),
        ]
    }

    #[test]
    fn too_few_waypoints_rejected() {
        let wps = vec![Vector2::new(0.0, 0.0)];
        assert!(matches!(
            Course::from_waypoints(&wps, 1.0),
            Err(CourseError::TooFewWaypoints(1))
        ));
    }

    #[test]
    fn arc_length_strictly_increasing() {
        let course = Course::from_waypoints(&square_wave_waypoints(), 1.0).unwrap();
        for i in 1..course.num_points() {
            assert!(course.s_m[i] > course.s_m[i - 1]);
        }
    }

    #[test]
    fn yaw_locally_continuous() {
        let course = Course::from_waypoints(&square_wave_waypoints(), 0.5).unwrap();
        for i in 1..course.num_points() {
            let dyaw = course.yaw_rad[i] - course.yaw_rad[i - 1];
            assert!(
                dyaw.abs() < std::f64::consts::FRAC_PI_2,
                "yaw jump of {} at sample {}",
                dyaw,
                i
            );
        }
    }

    #[test]
    fn rebuild_is_deterministic() {
        let wps = square_wave_waypoints();
        let a = Course::from_waypoints(&wps, 1.0).unwrap();
        let b = Course::from_waypoints(&wps, 1.0).unwrap();

        assert_eq!(a.num_points(), b.num_points());
        for i in 0..a.num_points() {
            assert_eq!(a.x_m[i], b.x_m[i]);
            assert_eq!(a.y_m[i], b.y_m[i]);
            assert_eq!(a.yaw_rad[i], b.yaw_rad[i]);
            assert_eq!(a.curv_per_m[i], b.curv_per_m[i]);
        }
    }

    #[test]
    fn straight_course_heading_constant() {
        let wps: Vec<Vector2<f64>> = (0..5).map(|i| Vector2::new(10.0 * i as f64, 0.0)).collect();
        let course = Course::from_waypoints(&wps, 1.0).unwrap();

        for i in 0..course.num_points() {
            assert_relative_eq!(course.yaw_rad[i], 0.0, epsilon = 1e-9);
            assert_relative_eq!(course.curv_per_m[i], 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn smooth_yaw_removes_wraps() {
        use std::f64::consts::PI;

        // A heading sequence crossing the +-pi boundary
        let mut yaw = vec![PI - 0.1, -PI + 0.1, -PI + 0.3];
        smooth_yaw(&mut yaw);

        assert_relative_eq!(yaw[1], PI + 0.1, epsilon = 1e-12);
        assert_relative_eq!(yaw[2], PI + 0.3, epsilon = 1e-12);
    }
}
