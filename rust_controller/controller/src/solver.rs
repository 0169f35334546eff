use std::fmt;

use osqp_wrapper::{Problem, Settings, Status};
use thiserror::Error;

use prelude::*;

/// The solver setup calls, in the order the loop makes them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverCall {
    Dimensions,
    Hessian,
    Gradient,
    ConstraintMatrix,
    Bounds,
    Init,
}

impl fmt::Display for SolverCall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            SolverCall::Dimensions => "set_dimensions",
            SolverCall::Hessian => "set_hessian",
            SolverCall::Gradient => "set_gradient",
            SolverCall::ConstraintMatrix => "set_constraint_matrix",
            SolverCall::Bounds => "set_bounds",
            SolverCall::Init => "init",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum SolverError {
    #[error("problem dimensions have not been set")]
    DimensionsNotSet,
    #[error("{what} has shape {found:?}, expected {expected:?}")]
    DimensionMismatch {
        what: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("{0} was not provided before init")]
    MissingData(&'static str),
    #[error("bound {index} is NaN")]
    NaNBound { index: usize },
    #[error("bounds are inverted at row {index}: {lower} > {upper}")]
    InvertedBounds {
        index: usize,
        lower: float,
        upper: float,
    },
    #[error("solver has not been initialised")]
    NotInitialised,
    #[error("solver is already initialised")]
    AlreadyInitialised,
    #[error("solver setup failed: {0}")]
    Setup(String),
    #[error("solve failed: {0}")]
    Failed(String),
}

/// A convex QP solver for `minimise ½zᵀPz + qᵀz subject to l ≤ Az ≤ u`.
///
/// Every setter must be called before `init`. After `init` only the bounds may change, and
/// consecutive solves are warm started from the previous solution.
pub trait QpSolver {
    fn set_dimensions(&mut self, n_variables: usize, n_constraints: usize)
        -> Result<(), SolverError>;

    fn set_hessian(&mut self, P: &sparse::CscMatrix) -> Result<(), SolverError>;

    fn set_gradient(&mut self, q: &[float]) -> Result<(), SolverError>;

    fn set_constraint_matrix(&mut self, A: &sparse::CscMatrix) -> Result<(), SolverError>;

    fn set_bounds(&mut self, l: &[float], u: &[float]) -> Result<(), SolverError>;

    fn init(&mut self) -> Result<(), SolverError>;

    fn solve(&mut self) -> Result<(), SolverError>;

    /// Decision vector of the last successful solve.
    fn solution(&self) -> Option<&[float]>;

    fn update_bounds(&mut self, l: &[float], u: &[float]) -> Result<(), SolverError>;
}

/// Checks `l` and `u` have `m` rows, contain no NaN and satisfy `l ≤ u`. Infinite entries are
/// allowed.
pub fn check_bounds(l: &[float], u: &[float], m: usize) -> Result<(), SolverError> {
    if l.len() != m {
        return Err(SolverError::DimensionMismatch {
            what: "l",
            expected: (m, 1),
            found: (l.len(), 1),
        });
    }
    if u.len() != m {
        return Err(SolverError::DimensionMismatch {
            what: "u",
            expected: (m, 1),
            found: (u.len(), 1),
        });
    }
    if let Some(index) = first_nan(l.iter().chain(u)) {
        return Err(SolverError::NaNBound { index: index % m });
    }
    for (index, (&lower, &upper)) in l.iter().zip(u).enumerate() {
        if lower > upper {
            return Err(SolverError::InvertedBounds {
                index,
                lower,
                upper,
            });
        }
    }
    Ok(())
}

/// OSQP settings used when none are given. Solver output is only printed when debug logging is
/// enabled.
pub fn default_settings() -> Settings {
    Settings::default()
        .verbose(log_enabled!(log::Level::Debug))
        .warm_start(true)
}

/// `QpSolver` backed by OSQP.
pub struct OsqpSolver {
    settings: Settings,
    dims: Option<(usize, usize)>,
    P: Option<sparse::CscMatrix>,
    q: Option<Vec<float>>,
    A: Option<sparse::CscMatrix>,
    bounds: Option<(Vec<float>, Vec<float>)>,
    problem: Option<Problem>,
    solution: Option<Vec<float>>,
    iterations: Option<u32>,
}

impl OsqpSolver {
    pub fn new() -> OsqpSolver {
        OsqpSolver::with_settings(default_settings())
    }

    /// Warm starting is always enabled, whatever `settings` says.
    pub fn with_settings(settings: Settings) -> OsqpSolver {
        OsqpSolver {
            settings: settings.warm_start(true),
            dims: None,
            P: None,
            q: None,
            A: None,
            bounds: None,
            problem: None,
            solution: None,
            iterations: None,
        }
    }

    pub fn is_initialised(&self) -> bool {
        self.problem.is_some()
    }

    /// ADMM iterations taken by the last call to `solve`.
    pub fn iterations(&self) -> Option<u32> {
        self.iterations
    }

    fn setup_dims(&self) -> Result<(usize, usize), SolverError> {
        if self.problem.is_some() {
            return Err(SolverError::AlreadyInitialised);
        }
        self.dims.ok_or(SolverError::DimensionsNotSet)
    }
}

impl Default for OsqpSolver {
    fn default() -> OsqpSolver {
        OsqpSolver::new()
    }
}

fn check_matrix_shape(
    what: &'static str,
    expected: (usize, usize),
    matrix: &sparse::CscMatrix,
) -> Result<(), SolverError> {
    if matrix.shape() != expected {
        return Err(SolverError::DimensionMismatch {
            what,
            expected,
            found: matrix.shape(),
        });
    }
    Ok(())
}

impl QpSolver for OsqpSolver {
    fn set_dimensions(
        &mut self,
        n_variables: usize,
        n_constraints: usize,
    ) -> Result<(), SolverError> {
        if self.problem.is_some() {
            return Err(SolverError::AlreadyInitialised);
        }
        self.dims = Some((n_variables, n_constraints));
        Ok(())
    }

    fn set_hessian(&mut self, P: &sparse::CscMatrix) -> Result<(), SolverError> {
        let (n, _) = self.setup_dims()?;
        check_matrix_shape("P", (n, n), P)?;
        self.P = Some(P.clone());
        Ok(())
    }

    fn set_gradient(&mut self, q: &[float]) -> Result<(), SolverError> {
        let (n, _) = self.setup_dims()?;
        if q.len() != n {
            return Err(SolverError::DimensionMismatch {
                what: "q",
                expected: (n, 1),
                found: (q.len(), 1),
            });
        }
        self.q = Some(q.to_vec());
        Ok(())
    }

    fn set_constraint_matrix(&mut self, A: &sparse::CscMatrix) -> Result<(), SolverError> {
        let (n, m) = self.setup_dims()?;
        check_matrix_shape("A", (m, n), A)?;
        self.A = Some(A.clone());
        Ok(())
    }

    fn set_bounds(&mut self, l: &[float], u: &[float]) -> Result<(), SolverError> {
        let (_, m) = self.setup_dims()?;
        check_bounds(l, u, m)?;
        self.bounds = Some((l.to_vec(), u.to_vec()));
        Ok(())
    }

    fn init(&mut self) -> Result<(), SolverError> {
        self.setup_dims()?;
        let P = self.P.as_ref().ok_or(SolverError::MissingData("hessian"))?;
        let q = self.q.as_ref().ok_or(SolverError::MissingData("gradient"))?;
        let A = self
            .A
            .as_ref()
            .ok_or(SolverError::MissingData("constraint matrix"))?;
        let (l, u) = self
            .bounds
            .as_ref()
            .ok_or(SolverError::MissingData("bounds"))?;

        let problem = Problem::new(P, q, A, l, u, &self.settings)
            .map_err(|err| SolverError::Setup(format!("{:?}", err)))?;
        debug!(
            "osqp initialised with {} variables and {} constraints",
            problem.n_variables(),
            problem.n_constraints()
        );
        self.problem = Some(problem);

        // OSQP keeps its own copy of the problem data
        self.P = None;
        self.q = None;
        self.A = None;
        self.bounds = None;
        Ok(())
    }

    fn solve(&mut self) -> Result<(), SolverError> {
        self.solution = None;
        self.iterations = None;
        let problem = self.problem.as_mut().ok_or(SolverError::NotInitialised)?;

        let status = problem.solve();
        self.iterations = Some(status.iter());
        debug!("osqp finished after {} iterations", status.iter());

        let x = match status {
            Status::Solved(solution) => solution.x().to_vec(),
            Status::SolvedInaccurate(solution) => {
                warn!("osqp returned an inaccurate solution");
                solution.x().to_vec()
            }
            Status::MaxIterationsReached(_) => {
                return Err(SolverError::Failed("maximum iterations reached".into()))
            }
            Status::TimeLimitReached(_) => {
                return Err(SolverError::Failed("time limit reached".into()))
            }
            Status::PrimalInfeasible(_) | Status::PrimalInfeasibleInaccurate(_) => {
                return Err(SolverError::Failed("primal infeasible".into()))
            }
            Status::DualInfeasible(_) | Status::DualInfeasibleInaccurate(_) => {
                return Err(SolverError::Failed("dual infeasible".into()))
            }
            _ => return Err(SolverError::Failed("problem is non-convex".into())),
        };

        if let Some(index) = x.iter().position(|v| !v.is_finite()) {
            return Err(SolverError::Failed(format!(
                "solution entry {} is not finite",
                index
            )));
        }
        self.solution = Some(x);
        Ok(())
    }

    fn solution(&self) -> Option<&[float]> {
        self.solution.as_ref().map(|x| &x[..])
    }

    fn update_bounds(&mut self, l: &[float], u: &[float]) -> Result<(), SolverError> {
        let problem = self.problem.as_mut().ok_or(SolverError::NotInitialised)?;
        check_bounds(l, u, problem.n_constraints())?;
        problem.update_bounds(l, u);
        Ok(())
    }
}
