//! # Speed profile
//!
//! Assigns a signed target speed to every course sample. A segment whose
//! travel direction disagrees with the sampled heading by 45 degrees or more
//! is driven in reverse (negative speed); the final sample is always zero so
//! the vehicle stops at the end of the course.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
use super::Course;
use util::maths::wrap_pi;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Build the speed profile for the given course.
///
/// The returned vector is aligned one-to-one with the course samples.
/// Negative entries command reverse travel.
pub fn speed_profile(course: &Course, target_speed_ms: f64) -> Vec<f64> {
    let n = course.num_points();
    let mut profile = vec![target_speed_ms; n];

    let mut forward = true;

    for i in 0..n.saturating_sub(1) {
        let dx = course.x_m[i + 1] - course.x_m[i];
        let dy = course.y_m[i + 1] - course.y_m[i];

        // Direction of travel over this segment. Degenerate segments keep
        // the previous direction flag.
        if dx != 0.0 || dy != 0.0 {
            let move_dir_rad = dy.atan2(dx);
            let dangle_rad = wrap_pi(move_dir_rad - course.yaw_rad[i]).abs();
            forward = dangle_rad < std::f64::consts::FRAC_PI_4;
        }

        profile[i] = if forward {
            target_speed_ms
        } else {
            -target_speed_ms
        };
    }

    // Always stop at the end of the course
    profile[n - 1] = 0.0;

    profile
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::Vector2;

    #[test]
    fn straight_course_all_forward() {
        let wps: Vec<Vector2<f64>> =
            (0..5).map(|i| Vector2::new(10.0 * i as f64, 0.0)).collect();
        let course = Course::from_waypoints(&wps, 1.0).unwrap();

        let profile = speed_profile(&course, 4.0);

        assert_eq!(profile.len(), course.num_points());
        for v in &profile[..profile.len() - 1] {
            assert_eq!(*v, 4.0);
        }
        assert_eq!(*profile.last().unwrap(), 0.0);
    }

    #[test]
    fn opposed_heading_marks_reverse() {
        // Hand-built course moving in -x while the heading points in +x,
        // i.e. the vehicle must back up.
        let course = Course {
            x_m: vec![0.0, -1.0, -2.0, -3.0],
            y_m: vec![0.0, 0.0, 0.0, 0.0],
            yaw_rad: vec![0.0, 0.0, 0.0, 0.0],
            curv_per_m: vec![0.0; 4],
            s_m: vec![0.0, 1.0, 2.0, 3.0],
            sep_m: 1.0,
        };

        let profile = speed_profile(&course, 4.0);

        assert_eq!(profile[0], -4.0);
        assert_eq!(profile[1], -4.0);
        assert_eq!(profile[2], -4.0);
        assert_eq!(profile[3], 0.0);
    }

    #[test]
    fn axis_aligned_reverse_detected() {
        // Travel in -y with heading +y. The original guarded this case out
        // of the direction test; here any non-degenerate segment is tested.
        let course = Course {
            x_m: vec![0.0, 0.0, 0.0],
            y_m: vec![0.0, -1.0, -2.0],
            yaw_rad: vec![std::f64::consts::FRAC_PI_2; 3],
            curv_per_m: vec![0.0; 3],
            s_m: vec![0.0, 1.0, 2.0],
            sep_m: 1.0,
        };

        let profile = speed_profile(&course, 2.0);

        assert_eq!(profile[0], -2.0);
        assert_eq!(profile[1], -2.0);
        assert_eq!(profile[2], 0.0);
    }
}
