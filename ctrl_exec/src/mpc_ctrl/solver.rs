//! # Linear MPC solver
//!
//! Builds and solves the quadratic program for one linearisation of the
//! vehicle dynamics, using Clarabel (pure Rust interior-point solver).
//!
//! # QP formulation
//!
//! Decision variables: `z = [x_0, ..., x_T, u_0, ..., u_{T-1}]` where `x_t`
//! is the 4D state [x, y, v, yaw] and `u_t` the 2D input [accel, steer].
//!
//! Cost: state tracking error against the reference window (terminal step
//! weighted separately), plus input magnitude and input rate-of-change
//! penalties.
//!
//! Subject to:
//! - Initial state: x_0 = current state (equality)
//! - Dynamics: x_{t+1} = A_t x_t + B_t u_t + C_t (equality)
//! - Speed bounds on every state (inequality)
//! - Acceleration and steering magnitude bounds on every input (inequality)
//! - Steering rate bound between consecutive inputs (inequality)

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{NonnegativeConeT, ZeroConeT},
};
use nalgebra::{DMatrix, DVector};

// Internal
use crate::vehicle::{VehicleModel, VehicleState, NUM_INPUTS, NUM_STATES};

use super::tracker::RefWindow;
use super::Params;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The output of one QP solve.
///
/// Control vectors hold `horizon` entries, predicted state vectors
/// `horizon + 1` (the first entry is the current state).
#[derive(Debug, Clone)]
pub struct MpcSolution {
    /// Optimal acceleration sequence
    pub accel_ms2: Vec<f64>,

    /// Optimal steering sequence
    pub steer_rad: Vec<f64>,

    /// Predicted x positions under the optimal controls
    pub x_m: Vec<f64>,

    /// Predicted y positions under the optimal controls
    pub y_m: Vec<f64>,

    /// Predicted speeds under the optimal controls
    pub speed_ms: Vec<f64>,

    /// Predicted headings under the optimal controls
    pub yaw_rad: Vec<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors that can occur during a QP solve.
#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    #[error("The solver rejected the problem data")]
    BadProblem,

    #[error("The problem is infeasible")]
    Infeasible,

    #[error("The solver hit its iteration limit before converging")]
    IterLimit,

    #[error("The solver failed with status {0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Solve the linear MPC problem about the given nominal trajectory.
///
/// `nominal` must hold `horizon + 1` states; the dynamics are linearised
/// at each one in turn, about the reference steering angles in `window`.
pub fn solve_linear_mpc(
    x0: &VehicleState,
    window: &RefWindow,
    nominal: &[VehicleState],
    model: &VehicleModel,
    params: &Params,
) -> Result<MpcSolution, SolveError> {
    let t_h = params.horizon;

    let n_x = NUM_STATES * (t_h + 1);
    let n_u = NUM_INPUTS * t_h;
    let n_z = n_x + n_u;

    let (p_mat, q_vec) = build_cost(window, params, n_z, n_x);
    let (a_all, b_all, n_eq, n_ineq) =
        build_constraints(x0, window, nominal, model, params, n_z, n_x);

    let p_csc = dmatrix_to_csc_upper_tri(&p_mat);
    let a_csc = dmatrix_to_csc(&a_all);

    let cones = vec![ZeroConeT(n_eq), NonnegativeConeT(n_ineq)];

    let settings = DefaultSettingsBuilder::default()
        .max_iter(params.max_solver_iters)
        .verbose(false)
        .tol_gap_abs(1e-6)
        .tol_gap_rel(1e-6)
        .tol_feas(1e-6)
        .build()
        .map_err(|_| SolveError::BadProblem)?;

    let q_slice: Vec<f64> = q_vec.iter().copied().collect();
    let b_slice: Vec<f64> = b_all.iter().copied().collect();

    let mut solver = DefaultSolver::new(&p_csc, &q_slice, &a_csc, &b_slice, &cones, settings)
        .map_err(|_| SolveError::BadProblem)?;

    solver.solve();

    match solver.solution.status {
        SolverStatus::Solved | SolverStatus::AlmostSolved => (),
        SolverStatus::PrimalInfeasible
        | SolverStatus::DualInfeasible
        | SolverStatus::AlmostPrimalInfeasible
        | SolverStatus::AlmostDualInfeasible => return Err(SolveError::Infeasible),
        SolverStatus::MaxIterations | SolverStatus::MaxTime => return Err(SolveError::IterLimit),
        status => return Err(SolveError::Failed(format!("{:?}", status))),
    }

    let z = &solver.solution.x;

    let mut solution = MpcSolution {
        accel_ms2: Vec::with_capacity(t_h),
        steer_rad: Vec::with_capacity(t_h),
        x_m: Vec::with_capacity(t_h + 1),
        y_m: Vec::with_capacity(t_h + 1),
        speed_ms: Vec::with_capacity(t_h + 1),
        yaw_rad: Vec::with_capacity(t_h + 1),
    };

    for t in 0..=t_h {
        let off = NUM_STATES * t;
        solution.x_m.push(z[off]);
        solution.y_m.push(z[off + 1]);
        solution.speed_ms.push(z[off + 2]);
        solution.yaw_rad.push(z[off + 3]);
    }

    for t in 0..t_h {
        let off = n_x + NUM_INPUTS * t;
        solution.accel_ms2.push(z[off]);
        solution.steer_rad.push(z[off + 1]);
    }

    Ok(solution)
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Build the cost matrices P (upper triangular) and q.
fn build_cost(
    window: &RefWindow,
    params: &Params,
    n_z: usize,
    n_x: usize,
) -> (DMatrix<f64>, DVector<f64>) {
    let t_h = params.horizon;

    let mut p = DMatrix::zeros(n_z, n_z);
    let mut q = DVector::zeros(n_z);

    // State tracking cost. The current state x_0 is fixed by an equality
    // constraint so it carries no cost; the terminal step uses its own
    // weights.
    for t in 1..=t_h {
        let w = if t == t_h {
            &params.terminal_cost
        } else {
            &params.state_cost
        };

        let x_off = NUM_STATES * t;
        let reference = [
            window.x_m[t],
            window.y_m[t],
            window.speed_ms[t],
            window.yaw_rad[t],
        ];

        for i in 0..NUM_STATES {
            p[(x_off + i, x_off + i)] += w[i];
            q[x_off + i] = -w[i] * reference[i];
        }
    }

    // Input magnitude cost
    for t in 0..t_h {
        let u_off = n_x + NUM_INPUTS * t;
        for j in 0..NUM_INPUTS {
            p[(u_off + j, u_off + j)] += params.input_cost[j];
        }
    }

    // Input rate-of-change cost between consecutive inputs. Each difference
    // contributes to both diagonals and a negative cross term.
    for t in 0..t_h.saturating_sub(1) {
        let u_off = n_x + NUM_INPUTS * t;
        let u_next_off = u_off + NUM_INPUTS;

        for j in 0..NUM_INPUTS {
            let rd = params.input_rate_cost[j];
            p[(u_off + j, u_off + j)] += rd;
            p[(u_next_off + j, u_next_off + j)] += rd;
            p[(u_off + j, u_next_off + j)] -= rd;
            p[(u_next_off + j, u_off + j)] -= rd;
        }
    }

    (p, q)
}

/// Build all constraint matrices.
///
/// Returns (A_all, b_all, n_eq, n_ineq) where equalities come first, as
/// the cone ordering requires.
fn build_constraints(
    x0: &VehicleState,
    window: &RefWindow,
    nominal: &[VehicleState],
    model: &VehicleModel,
    params: &Params,
    n_z: usize,
    n_x: usize,
) -> (DMatrix<f64>, DVector<f64>, usize, usize) {
    let t_h = params.horizon;
    let vp = model.params();

    let n_eq = NUM_STATES * (t_h + 1);
    let n_ineq = 2 * (t_h + 1) + 4 * t_h + 2 * t_h.saturating_sub(1);
    let n_constraints = n_eq + n_ineq;

    let mut a_all = DMatrix::zeros(n_constraints, n_z);
    let mut b_all = DVector::zeros(n_constraints);

    let mut row = 0;

    // --- Initial state equality: x_0 = current state ---
    let x0_vec = x0.as_vector();
    for i in 0..NUM_STATES {
        a_all[(row + i, i)] = 1.0;
        b_all[row + i] = x0_vec[i];
    }
    row += NUM_STATES;

    // --- Dynamics equalities: x_{t+1} - A_t x_t - B_t u_t = C_t ---
    for t in 0..t_h {
        let lin = model.linearize(
            nominal[t].speed_ms,
            nominal[t].yaw_rad,
            window.steer_rad[t],
            params.dt_s,
        );

        let x_t_off = NUM_STATES * t;
        let x_t1_off = x_t_off + NUM_STATES;
        let u_t_off = n_x + NUM_INPUTS * t;

        for i in 0..NUM_STATES {
            a_all[(row + i, x_t1_off + i)] = 1.0;

            for j in 0..NUM_STATES {
                let val = lin.a[(i, j)];
                if val != 0.0 {
                    a_all[(row + i, x_t_off + j)] = -val;
                }
            }

            for j in 0..NUM_INPUTS {
                let val = lin.b[(i, j)];
                if val != 0.0 {
                    a_all[(row + i, u_t_off + j)] = -val;
                }
            }

            b_all[row + i] = lin.c[i];
        }

        row += NUM_STATES;
    }

    debug_assert_eq!(row, n_eq);

    // --- Speed bounds on every state ---
    for t in 0..=t_h {
        let v_col = NUM_STATES * t + 2;

        a_all[(row, v_col)] = 1.0;
        b_all[row] = vp.max_speed_ms;
        row += 1;

        a_all[(row, v_col)] = -1.0;
        b_all[row] = -vp.min_speed_ms;
        row += 1;
    }

    // --- Input magnitude bounds ---
    for t in 0..t_h {
        let u_off = n_x + NUM_INPUTS * t;

        a_all[(row, u_off)] = 1.0;
        b_all[row] = vp.max_accel_ms2;
        row += 1;

        a_all[(row, u_off)] = -1.0;
        b_all[row] = vp.max_accel_ms2;
        row += 1;

        a_all[(row, u_off + 1)] = 1.0;
        b_all[row] = vp.max_steer_rad;
        row += 1;

        a_all[(row, u_off + 1)] = -1.0;
        b_all[row] = vp.max_steer_rad;
        row += 1;
    }

    // --- Steering rate bounds between consecutive inputs ---
    let max_dsteer_rad = vp.max_steer_rate_rads * params.dt_s;

    for t in 0..t_h.saturating_sub(1) {
        let steer_col = n_x + NUM_INPUTS * t + 1;
        let steer_next_col = steer_col + NUM_INPUTS;

        a_all[(row, steer_next_col)] = 1.0;
        a_all[(row, steer_col)] = -1.0;
        b_all[row] = max_dsteer_rad;
        row += 1;

        a_all[(row, steer_next_col)] = -1.0;
        a_all[(row, steer_col)] = 1.0;
        b_all[row] = max_dsteer_rad;
        row += 1;
    }

    debug_assert_eq!(row, n_constraints);

    (a_all, b_all, n_eq, n_ineq)
}

/// Convert a nalgebra `DMatrix<f64>` to a Clarabel `CscMatrix<f64>`.
fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v != 0.0 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// Convert a symmetric nalgebra `DMatrix<f64>` to its upper triangle as a
/// Clarabel `CscMatrix<f64>`.
fn dmatrix_to_csc_upper_tri(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..=j.min(nrows - 1) {
            let v = m[(i, j)];
            if v != 0.0 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
