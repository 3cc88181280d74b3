//! # Course tracker
//!
//! Matches the vehicle to the course and extracts the reference window the
//! optimiser tracks over the horizon. The nearest-point search is windowed
//! around the previous match so the controller cannot jump to a distant
//! part of a self-crossing course.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
use crate::course::Course;
use util::maths::wrap_pi;

use super::Params;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The reference the optimiser tracks over one horizon.
///
/// All vectors hold `horizon + 1` entries, one per horizon sample starting
/// at the current instant.
#[derive(Debug, Clone)]
pub struct RefWindow {
    /// Reference x positions
    pub x_m: Vec<f64>,

    /// Reference y positions
    pub y_m: Vec<f64>,

    /// Reference signed speeds
    pub speed_ms: Vec<f64>,

    /// Reference headings
    pub yaw_rad: Vec<f64>,

    /// Reference steering angles. Zero everywhere; carried explicitly
    /// because the dynamics are linearised about these values.
    pub steer_rad: Vec<f64>,
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Find the course sample nearest the given position, searching only the
/// window of samples starting at `lower`.
///
/// Returns the matched index and the Euclidean distance to that sample,
/// signed positive when the vehicle is to the left of the course heading
/// there. The matched sample can sit ahead of or behind the vehicle along
/// the course, so this distance includes the along-track offset and is not
/// a pure cross-track error. Ties resolve to the earlier sample.
pub fn nearest_index(
    x_m: f64,
    y_m: f64,
    course: &Course,
    lower: usize,
    window: usize,
) -> (usize, f64) {
    let upper = (lower + window).min(course.num_points());

    let mut best_ind = lower;
    let mut best_d2 = f64::INFINITY;

    for i in lower..upper {
        let dx = x_m - course.x_m[i];
        let dy = y_m - course.y_m[i];
        let d2 = dx * dx + dy * dy;

        if d2 < best_d2 {
            best_d2 = d2;
            best_ind = i;
        }
    }

    let dist_m = best_d2.sqrt();

    // Sign from which side of the course heading the vehicle lies on
    let dxl = course.x_m[best_ind] - x_m;
    let dyl = course.y_m[best_ind] - y_m;
    let angle_rad = wrap_pi(course.yaw_rad[best_ind] - dyl.atan2(dxl));

    if angle_rad < 0.0 {
        (best_ind, -dist_m)
    } else {
        (best_ind, dist_m)
    }
}

/// Build the reference window for one cycle.
///
/// The window starts at the nearest sample (never behind `lower`, so the
/// match can only advance along the course) and walks forward at the
/// current speed, `|v| dt` of arc per horizon step. Past the course end
/// every remaining entry is the final sample.
///
/// Returns the window, the matched index and the signed distance to it.
pub fn ref_window(
    x_m: f64,
    y_m: f64,
    speed_ms: f64,
    course: &Course,
    profile: &[f64],
    params: &Params,
    lower: usize,
) -> (RefWindow, usize, f64) {
    let n = course.num_points();
    let t_h = params.horizon;

    let (nearest, nearest_dist_m) = nearest_index(x_m, y_m, course, lower, params.search_window);
    let ind = nearest.max(lower);

    let mut window = RefWindow {
        x_m: vec![course.x_m[ind]; t_h + 1],
        y_m: vec![course.y_m[ind]; t_h + 1],
        speed_ms: vec![profile[ind]; t_h + 1],
        yaw_rad: vec![course.yaw_rad[ind]; t_h + 1],
        steer_rad: vec![0.0; t_h + 1],
    };

    let mut travel_m = 0.0;

    for i in 0..=t_h {
        travel_m += speed_ms.abs() * params.dt_s;
        let dind = (travel_m / course.sep_m).round() as usize;

        let j = if ind + dind < n { ind + dind } else { n - 1 };

        window.x_m[i] = course.x_m[j];
        window.y_m[i] = course.y_m[j];
        window.speed_ms[i] = profile[j];
        window.yaw_rad[i] = course.yaw_rad[j];
    }

    (window, ind, nearest_dist_m)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::course::profile::speed_profile;
    use crate::mpc_ctrl::test_utils::test_mpc_params;
    use approx::assert_relative_eq;
    use nalgebra::Vector2;

    fn straight_course() -> Course {
        let wps: Vec<Vector2<f64>> =
            (0..5).map(|i| Vector2::new(10.0 * i as f64, 0.0)).collect();
        Course::from_waypoints(&wps, 1.0).unwrap()
    }

    #[test]
    fn nearest_finds_closest_in_window() {
        let course = straight_course();

        let (ind, dist_m) = nearest_index(7.3, 0.0, &course, 0, 10);
        assert_eq!(ind, 7);
        assert_relative_eq!(dist_m.abs(), 0.3, epsilon = 1e-9);
    }

    #[test]
    fn nearest_respects_lower_bound() {
        let course = straight_course();

        // The closest sample overall is 2, but the search starts at 5
        let (ind, _) = nearest_index(2.0, 0.0, &course, 5, 10);
        assert_eq!(ind, 5);
    }

    #[test]
    fn nearest_distance_signed_by_side() {
        let course = straight_course();

        // Course runs along +x. Left of it (+y) gives one sign, right the
        // other.
        let (_, left) = nearest_index(10.0, 1.0, &course, 5, 10);
        let (_, right) = nearest_index(10.0, -1.0, &course, 5, 10);

        assert!(left * right < 0.0);
        assert_relative_eq!(left.abs(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(right.abs(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn distance_includes_along_track_offset() {
        let course = straight_course();

        // Exactly on the line midway between two samples: zero lateral
        // deviation, but still half a sample spacing away from the match
        let (ind, dist_m) = nearest_index(7.5, 0.0, &course, 0, 10);
        assert_eq!(ind, 7);
        assert_relative_eq!(dist_m.abs(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn window_advances_with_speed() {
        let course = straight_course();
        let params = test_mpc_params();
        let profile = speed_profile(&course, params.target_speed_ms);

        // At 5 m/s each horizon step covers one sample of the course
        let (window, ind, _) = ref_window(0.0, 0.0, 5.0, &course, &profile, &params, 0);
        assert_eq!(ind, 0);

        for i in 0..=params.horizon {
            assert_relative_eq!(window.x_m[i], (i + 1) as f64, epsilon = 1e-9);
        }
    }

    #[test]
    fn window_clamps_at_course_end() {
        let course = straight_course();
        let params = test_mpc_params();
        let profile = speed_profile(&course, params.target_speed_ms);

        let n = course.num_points();
        let goal = course.goal();

        let (window, _, _) = ref_window(
            goal[0],
            goal[1],
            5.0,
            &course,
            &profile,
            &params,
            n - 3,
        );

        // Every entry at or past the end collapses onto the final sample
        assert_relative_eq!(window.x_m[params.horizon], goal[0], epsilon = 1e-9);
        assert_relative_eq!(window.speed_ms[params.horizon], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn match_never_moves_backwards() {
        let course = straight_course();
        let params = test_mpc_params();
        let profile = speed_profile(&course, params.target_speed_ms);

        // Vehicle physically closest to sample 3, but the previous match
        // was 6
        let (_, ind, _) = ref_window(3.0, 0.0, 1.0, &course, &profile, &params, 6);
        assert!(ind >= 6);
    }
}
