#![allow(non_snake_case)]

extern crate osqp as osqp_inner;
extern crate prelude;
extern crate sparse;

use self::osqp_inner::Problem as InnerProblem;
pub use self::osqp_inner::{CscMatrix, SetupError, Settings, Status};

use prelude::*;

/// An OSQP problem instance whose calls are recorded as profiling spans.
pub struct Problem {
    inner: InnerProblem,
    n: usize,
    m: usize,
}

impl Problem {
    /// Sets up the solver for `minimise ½xᵀPx + qᵀx subject to l ≤ Ax ≤ u`.
    ///
    /// Only the upper triangle of `P` is passed to OSQP.
    pub fn new(
        P: &sparse::CscMatrix,
        q: &[float],
        A: &sparse::CscMatrix,
        l: &[float],
        u: &[float],
        settings: &Settings,
    ) -> Result<Problem, SetupError> {
        let _guard = flame::start_guard("osqp setup");
        let (m, n) = A.shape();
        let inner = InnerProblem::new(
            convert_sparse(P).into_upper_tri(),
            q,
            convert_sparse(A),
            l,
            u,
            settings,
        )?;
        Ok(Problem { inner, n, m })
    }

    pub fn n_variables(&self) -> usize {
        self.n
    }

    pub fn n_constraints(&self) -> usize {
        self.m
    }

    pub fn update_bounds(&mut self, l: &[float], u: &[float]) {
        let _guard = flame::start_guard("osqp update_bounds");
        self.inner.update_bounds(l, u)
    }

    pub fn solve(&mut self) -> Status {
        let _guard = flame::start_guard("osqp solve");
        self.inner.solve()
    }
}

pub fn convert_sparse(this: &sparse::CscMatrix) -> CscMatrix {
    let (nrows, ncols) = this.shape();
    CscMatrix {
        nrows,
        ncols,
        indptr: this.indptr().into(),
        indices: this.indices().into(),
        data: this.data().into(),
    }
}
