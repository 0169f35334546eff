use std::iter::repeat;

use control_model::{check_finite, check_shape, check_weights};
use control_model::{ConfigurationError, ConstraintSpec, LinearPlantModel};
use prelude::*;

use crate::bounds::{self, StateError};
use crate::solver::SolverError;

/// Sizes and offsets of the decision vector `z = [x_0, .., x_N, u_0, .., u_{N-1}]` and of the
/// constraint rows `[dynamics; identity]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub nx: usize,
    pub nu: usize,
    pub N: usize,
}

impl Layout {
    pub fn new(nx: usize, nu: usize, N: usize) -> Layout {
        Layout { nx, nu, N }
    }

    pub fn n_states(&self) -> usize {
        self.nx * (self.N + 1)
    }

    pub fn n_inputs(&self) -> usize {
        self.nu * self.N
    }

    pub fn n_variables(&self) -> usize {
        self.n_states() + self.n_inputs()
    }

    /// Dynamics equality rows followed by one box constraint row per variable.
    pub fn n_constraints(&self) -> usize {
        self.n_states() + self.n_variables()
    }

    pub fn state_offset(&self, i: usize) -> usize {
        self.nx * i
    }

    pub fn input_offset(&self, i: usize) -> usize {
        self.n_states() + self.nu * i
    }
}

/// Block diagonal `diag(Q, .., Q, R, .., R)` with `N + 1` state blocks and `N` input blocks.
/// Zero weights are left out of the sparsity pattern.
pub fn hessian(Q: &Vector, R: &Vector, N: usize) -> Result<sparse::CscMatrix, ConfigurationError> {
    check_weights("Q", Q)?;
    check_weights("R", R)?;

    let Q = sparse::diag(Q.as_slice());
    let R = sparse::diag(R.as_slice());
    let blocks: Vec<_> = repeat(&Q).take(N + 1).chain(repeat(&R).take(N)).collect();

    Ok(sparse::block_diag(&blocks).build_csc())
}

/// Linear cost for tracking a constant reference. The constant `x_refᵀ Q x_ref` term is dropped.
pub fn gradient(
    Q: &Vector,
    x_ref: &Vector,
    nu: usize,
    N: usize,
) -> Result<Vector, ConfigurationError> {
    let x_refs = vec![x_ref.clone(); N + 1];
    gradient_for_trajectory(Q, &x_refs, nu)
}

/// Linear cost for tracking one reference per horizon step, `x_refs[i]` for `x_i`. The horizon
/// length is `x_refs.len() - 1`.
pub fn gradient_for_trajectory(
    Q: &Vector,
    x_refs: &[Vector],
    nu: usize,
) -> Result<Vector, ConfigurationError> {
    let nx = Q.len();
    if x_refs.is_empty() {
        return Err(ConfigurationError::ZeroHorizon);
    }
    let layout = Layout::new(nx, nu, x_refs.len() - 1);

    let mut q = Vector::zeros(layout.n_variables());
    for (i, x_ref) in x_refs.iter().enumerate() {
        check_shape("x_ref", (nx, 1), x_ref.shape())?;
        check_finite("x_ref", x_ref.iter())?;
        q.rows_mut(layout.state_offset(i), nx)
            .copy_from(&-Q.component_mul(x_ref));
    }
    Ok(q)
}

/// Constraint matrix
///
/// ```text
/// [ -I                  |        ]   x_0 = x_current (via the bounds)
/// [  A  -I              |  B     ]   A x_0 + B u_0 - x_1 = 0
/// [      A  -I          |    B   ]   ...
/// [ ------------------- | ------ ]
/// [  I                           ]   box bounds on every x_i and u_i
/// ```
///
/// Exact zeros in `A` and `B` are not stored.
pub fn constraint_matrix(
    A: &Matrix,
    B: &Matrix,
    N: usize,
) -> Result<sparse::CscMatrix, ConfigurationError> {
    let nx = A.nrows();
    let nu = B.ncols();
    check_shape("A", (nx, nx), A.shape())?;
    check_shape("B", (nx, nu), B.shape())?;
    let layout = Layout::new(nx, nu, N);
    let n_states = layout.n_states();
    let n_inputs = layout.n_inputs();

    let _guard = flame::start_guard("build constraint matrix");

    let A = sparse::block(A);
    let B = sparse::block(B);

    // State evolution: A sits one block row below the diagonal
    let Ax = sparse::vstack(&[
        sparse::zeros(nx, n_states),
        sparse::hstack(&[
            sparse::block_diag(&repeat(&A).take(N).collect::<Vec<_>>()),
            sparse::zeros(nx * N, nx),
        ]),
    ]);
    let Ax = -sparse::eye(n_states) + Ax;

    let Bu = sparse::vstack(&[
        sparse::zeros(nx, n_inputs),
        sparse::block_diag(&repeat(&B).take(N).collect::<Vec<_>>()),
    ]);

    Ok(sparse::vstack(&[
        sparse::hstack(&[Ax, Bu]),
        sparse::eye(n_states + n_inputs),
    ]).build_csc())
}

/// Lower and upper bounds matching `constraint_matrix`. The first `nx` equality rows hold `-x0`,
/// the remaining dynamics rows are zero and the box rows repeat the state and input bounds.
pub fn bound_vectors(
    spec: &ConstraintSpec,
    x0: &Vector,
    N: usize,
) -> Result<(Vector, Vector), ConfigurationError> {
    spec.validate()?;
    let layout = Layout::new(spec.nx(), spec.nu(), N);
    let (nx, nu) = (layout.nx, layout.nu);
    check_shape("x0", (nx, 1), x0.shape())?;
    check_finite("x0", x0.iter())?;

    let mut l = Vector::zeros(layout.n_constraints());
    let mut u = Vector::zeros(layout.n_constraints());

    let ineq = layout.n_states();
    for i in 0..N + 1 {
        let row = ineq + layout.state_offset(i);
        l.rows_mut(row, nx).copy_from(&spec.x_min);
        u.rows_mut(row, nx).copy_from(&spec.x_max);
    }
    for i in 0..N {
        let row = ineq + layout.input_offset(i);
        l.rows_mut(row, nu).copy_from(&spec.u_min);
        u.rows_mut(row, nu).copy_from(&spec.u_max);
    }

    l.rows_mut(0, nx).copy_from(&-x0);
    u.rows_mut(0, nx).copy_from(&-x0);

    Ok((l, u))
}

/// The MPC problem as `minimise ½zᵀPz + qᵀz subject to l ≤ Az ≤ u`.
///
/// `P`, `q` and `A` are fixed for a run. Only the initial state rows of `l` and `u` change
/// between solves.
#[derive(Clone, Debug)]
pub struct QpProblem {
    pub layout: Layout,
    pub P: sparse::CscMatrix,
    pub q: Vector,
    pub A: sparse::CscMatrix,
    pub l: Vector,
    pub u: Vector,
}

impl QpProblem {
    /// Transcribes a constant reference tracking problem over a horizon of `N` steps.
    pub fn new(
        model: &LinearPlantModel,
        spec: &ConstraintSpec,
        x_ref: &Vector,
        x0: &Vector,
        N: usize,
    ) -> Result<QpProblem, ConfigurationError> {
        let x_refs = vec![x_ref.clone(); N + 1];
        QpProblem::with_trajectory(model, spec, &x_refs, x0)
    }

    /// Transcribes a trajectory tracking problem. `x_refs` holds one reference per predicted
    /// state, so the horizon is `x_refs.len() - 1` steps.
    pub fn with_trajectory(
        model: &LinearPlantModel,
        spec: &ConstraintSpec,
        x_refs: &[Vector],
        x0: &Vector,
    ) -> Result<QpProblem, ConfigurationError> {
        if x_refs.len() < 2 {
            return Err(ConfigurationError::ZeroHorizon);
        }
        let N = x_refs.len() - 1;
        spec.validate_for(model)?;

        let _guard = flame::start_guard("transcribe mpc");

        let layout = Layout::new(model.nx(), model.nu(), N);
        let P = hessian(&spec.Q, &spec.R, N)?;
        let q = gradient_for_trajectory(&spec.Q, x_refs, layout.nu)?;
        let A = constraint_matrix(model.A(), model.B(), N)?;
        let (l, u) = bound_vectors(spec, x0, N)?;

        debug!(
            "transcribed mpc: N = {}, {} variables, {} constraints, nnz(P) = {}, nnz(A) = {}",
            N,
            layout.n_variables(),
            layout.n_constraints(),
            P.nnz(),
            A.nnz()
        );

        Ok(QpProblem {
            layout,
            P,
            q,
            A,
            l,
            u,
        })
    }

    /// Copies of `l` and `u` with the initial state rows pinned to a new measurement. Every
    /// other bound is left untouched.
    pub fn bounds_for_state(&self, x: &Vector) -> Result<(Vector, Vector), StateError> {
        let (mut l, mut u) = (self.l.clone(), self.u.clone());
        bounds::update_initial_state(self.layout.nx, &mut l, &mut u, x)?;
        Ok((l, u))
    }

    /// First control action `u_0` of a solution vector.
    pub fn first_input(&self, z: &[float]) -> Result<Vector, SolverError> {
        let n = self.layout.n_variables();
        if z.len() != n {
            return Err(SolverError::DimensionMismatch {
                what: "solution",
                expected: (n, 1),
                found: (z.len(), 1),
            });
        }
        let start = self.layout.input_offset(0);
        Ok(Vector::from_column_slice(&z[start..start + self.layout.nu]))
    }

    /// Predicted state `x_i` of a solution vector.
    pub fn predicted_state(&self, z: &[float], i: usize) -> Vector {
        let start = self.layout.state_offset(i);
        Vector::from_column_slice(&z[start..start + self.layout.nx])
    }
}
