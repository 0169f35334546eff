use control_model::{ConstraintSpec, LinearPlantModel};
use prelude::*;

use crate::solver::{QpSolver, SolverCall, SolverError};
use crate::transcribe::QpProblem;
use crate::MpcError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Initialized,
    Stepping,
    Failed,
    Done,
}

/// One applied control action and the plant state it produced.
#[derive(Clone, Debug, PartialEq)]
pub struct StepRecord {
    pub step: usize,
    pub control: Vector,
    pub state: Vector,
    pub error_norm: float,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunRecord {
    pub initial_state: Vector,
    pub steps: Vec<StepRecord>,
}

impl RunRecord {
    pub fn final_state(&self) -> &Vector {
        self.steps
            .last()
            .map(|s| &s.state)
            .unwrap_or(&self.initial_state)
    }
}

/// Euclidean distance between the plant state and its reference.
pub fn error_norm(x: &Vector, x_ref: &Vector) -> float {
    (x - x_ref).norm()
}

fn init_error(call: SolverCall) -> impl Fn(SolverError) -> MpcError {
    move |source| MpcError::SolverInit { call, source }
}

/// Transcribes the MPC problem once, then for a fixed number of steps solves it, applies the
/// first control action to the plant model and pins the next solve to the propagated state.
///
/// Any error is fatal and moves the loop to `LoopState::Failed`.
pub struct RecedingHorizonLoop<S: QpSolver> {
    model: LinearPlantModel,
    spec: ConstraintSpec,
    x_refs: Vec<Vector>,
    solver: S,
    qp: Option<QpProblem>,
    x: Option<Vector>,
    step: usize,
    n_steps: usize,
    state: LoopState,
}

impl<S: QpSolver> RecedingHorizonLoop<S> {
    /// Loop tracking a constant reference `x_ref` over a horizon of `N` steps.
    pub fn new(
        model: LinearPlantModel,
        spec: ConstraintSpec,
        x_ref: Vector,
        N: usize,
        solver: S,
    ) -> RecedingHorizonLoop<S> {
        let x_refs = vec![x_ref; N + 1];
        RecedingHorizonLoop::with_trajectory(model, spec, x_refs, solver)
    }

    /// Loop tracking one reference per predicted state. The horizon is `x_refs.len() - 1`
    /// steps.
    pub fn with_trajectory(
        model: LinearPlantModel,
        spec: ConstraintSpec,
        x_refs: Vec<Vector>,
        solver: S,
    ) -> RecedingHorizonLoop<S> {
        RecedingHorizonLoop {
            model,
            spec,
            x_refs,
            solver,
            qp: None,
            x: None,
            step: 0,
            n_steps: 0,
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Current plant state, once initialised.
    pub fn x(&self) -> Option<&Vector> {
        self.x.as_ref()
    }

    pub fn qp(&self) -> Option<&QpProblem> {
        self.qp.as_ref()
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn model(&self) -> &LinearPlantModel {
        &self.model
    }

    /// Number of steps taken so far.
    pub fn steps_taken(&self) -> usize {
        self.step
    }

    /// Transcribes the problem from `x0` and hands it to the solver. The loop then accepts
    /// `n_steps` calls to `step`.
    pub fn initialise(&mut self, x0: &Vector, n_steps: usize) -> Result<(), MpcError> {
        if self.state != LoopState::Idle {
            return Err(MpcError::NotIdle { state: self.state });
        }

        match self.setup_solver(x0) {
            Ok(qp) => {
                self.qp = Some(qp);
                self.x = Some(x0.clone());
                self.step = 0;
                self.n_steps = n_steps;
                self.state = if n_steps == 0 {
                    LoopState::Done
                } else {
                    LoopState::Initialized
                };
                Ok(())
            }
            Err(err) => {
                self.state = LoopState::Failed;
                Err(err)
            }
        }
    }

    fn setup_solver(&mut self, x0: &Vector) -> Result<QpProblem, MpcError> {
        let qp = flame::span_of("transcribe", || {
            QpProblem::with_trajectory(&self.model, &self.spec, &self.x_refs, x0)
        })?;

        let layout = qp.layout;
        self.solver
            .set_dimensions(layout.n_variables(), layout.n_constraints())
            .map_err(init_error(SolverCall::Dimensions))?;
        self.solver
            .set_hessian(&qp.P)
            .map_err(init_error(SolverCall::Hessian))?;
        self.solver
            .set_gradient(qp.q.as_slice())
            .map_err(init_error(SolverCall::Gradient))?;
        self.solver
            .set_constraint_matrix(&qp.A)
            .map_err(init_error(SolverCall::ConstraintMatrix))?;
        self.solver
            .set_bounds(qp.l.as_slice(), qp.u.as_slice())
            .map_err(init_error(SolverCall::Bounds))?;
        self.solver
            .init()
            .map_err(init_error(SolverCall::Init))?;

        debug!(
            "receding horizon loop initialised with N = {}",
            layout.N
        );
        Ok(qp)
    }

    /// Solves the current problem, applies `u_0` and updates the initial state bounds.
    pub fn step(&mut self) -> Result<StepRecord, MpcError> {
        match self.state {
            LoopState::Initialized | LoopState::Stepping => {}
            state => return Err(MpcError::NotRunning { state }),
        }

        match self.advance() {
            Ok(record) => {
                self.step += 1;
                self.state = if self.step >= self.n_steps {
                    LoopState::Done
                } else {
                    LoopState::Stepping
                };
                Ok(record)
            }
            Err(err) => {
                self.state = LoopState::Failed;
                Err(err)
            }
        }
    }

    fn advance(&mut self) -> Result<StepRecord, MpcError> {
        let step = self.step;
        let (qp, x) = match (self.qp.as_mut(), self.x.as_ref()) {
            (Some(qp), Some(x)) => (qp, x),
            _ => return Err(MpcError::NotRunning { state: self.state }),
        };

        self.solver
            .solve()
            .map_err(|source| MpcError::Solve { step, source })?;
        let u0 = {
            let z = self.solver.solution().ok_or_else(|| MpcError::Solve {
                step,
                source: SolverError::Failed("no solution available".into()),
            })?;
            qp.first_input(z)
                .map_err(|source| MpcError::Solve { step, source })?
        };

        let x_next = self.model.propagate(x, &u0);
        let (l, u) = qp
            .bounds_for_state(&x_next)
            .map_err(|source| MpcError::InvalidState { step, source })?;
        self.solver
            .update_bounds(l.as_slice(), u.as_slice())
            .map_err(|source| MpcError::BoundUpdate { step, source })?;
        qp.l = l;
        qp.u = u;

        let tracking_error = error_norm(&x_next, &self.x_refs[0]);
        debug!("step {}: u = {:?}, error = {}", step, u0.as_slice(), tracking_error);

        self.x = Some(x_next.clone());
        Ok(StepRecord {
            step,
            control: u0,
            state: x_next,
            error_norm: tracking_error,
        })
    }

    /// Initialises from `x0` and steps until `n_steps` control actions have been applied.
    pub fn run(&mut self, x0: &Vector, n_steps: usize) -> Result<RunRecord, MpcError> {
        let _guard = flame::start_guard("receding horizon run");
        self.initialise(x0, n_steps)?;

        let mut steps = Vec::with_capacity(n_steps);
        while self.state != LoopState::Done {
            steps.push(self.step()?);
        }
        Ok(RunRecord {
            initial_state: x0.clone(),
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use control_model::ConfigurationError;
    use float_eq::assert_float_eq;

    /// Returns a decision vector with a fixed first input and fails on request.
    #[derive(Default)]
    struct ScriptedSolver {
        input_offset: usize,
        control: Vec<float>,
        fail_call: Option<SolverCall>,
        fail_solve_at: Option<usize>,
        fail_update_at: Option<usize>,
        dims: (usize, usize),
        calls: Vec<SolverCall>,
        solves: usize,
        updates: Vec<(Vec<float>, Vec<float>)>,
        solution: Option<Vec<float>>,
    }

    impl ScriptedSolver {
        fn record(&mut self, call: SolverCall) -> Result<(), SolverError> {
            self.calls.push(call);
            if self.fail_call == Some(call) {
                return Err(SolverError::Setup("scripted".into()));
            }
            Ok(())
        }
    }

    impl QpSolver for ScriptedSolver {
        fn set_dimensions(&mut self, n: usize, m: usize) -> Result<(), SolverError> {
            self.dims = (n, m);
            self.record(SolverCall::Dimensions)
        }

        fn set_hessian(&mut self, _: &sparse::CscMatrix) -> Result<(), SolverError> {
            self.record(SolverCall::Hessian)
        }

        fn set_gradient(&mut self, _: &[float]) -> Result<(), SolverError> {
            self.record(SolverCall::Gradient)
        }

        fn set_constraint_matrix(&mut self, _: &sparse::CscMatrix) -> Result<(), SolverError> {
            self.record(SolverCall::ConstraintMatrix)
        }

        fn set_bounds(&mut self, _: &[float], _: &[float]) -> Result<(), SolverError> {
            self.record(SolverCall::Bounds)
        }

        fn init(&mut self) -> Result<(), SolverError> {
            self.record(SolverCall::Init)
        }

        fn solve(&mut self) -> Result<(), SolverError> {
            let attempt = self.solves;
            self.solves += 1;
            self.solution = None;
            if self.fail_solve_at == Some(attempt) {
                return Err(SolverError::Failed("primal infeasible".into()));
            }
            let mut z = vec![0.0; self.dims.0];
            z[self.input_offset..self.input_offset + self.control.len()]
                .copy_from_slice(&self.control);
            self.solution = Some(z);
            Ok(())
        }

        fn solution(&self) -> Option<&[float]> {
            self.solution.as_ref().map(|z| &z[..])
        }

        fn update_bounds(&mut self, l: &[float], u: &[float]) -> Result<(), SolverError> {
            if self.fail_update_at == Some(self.updates.len()) {
                return Err(SolverError::DimensionMismatch {
                    what: "l",
                    expected: (self.dims.1, 1),
                    found: (l.len(), 1),
                });
            }
            self.updates.push((l.to_vec(), u.to_vec()));
            Ok(())
        }
    }

    const N: usize = 3;

    fn vector(vals: &[float]) -> Vector {
        Vector::from_column_slice(vals)
    }

    fn double_integrator() -> LinearPlantModel {
        #[cfg_attr(rustfmt, rustfmt_skip)]
        let A = Matrix::from_row_slice(2, 2, &[
            1.0, 0.1,
            0.0, 1.0,
        ]);
        let B = Matrix::from_row_slice(2, 1, &[0.005, 0.1]);
        LinearPlantModel::new(A, B).unwrap()
    }

    fn spec(Q: Vector) -> ConstraintSpec {
        ConstraintSpec::new(
            vector(&[NEG_INFINITY, -5.0]),
            vector(&[INFINITY, 5.0]),
            vector(&[-2.0]),
            vector(&[2.0]),
            Q,
            vector(&[0.1]),
        )
        .unwrap()
    }

    fn scripted() -> ScriptedSolver {
        ScriptedSolver {
            // nx (N + 1)
            input_offset: 2 * (N + 1),
            control: vec![1.0],
            ..Default::default()
        }
    }

    fn mpc_loop(solver: ScriptedSolver) -> RecedingHorizonLoop<ScriptedSolver> {
        RecedingHorizonLoop::new(
            double_integrator(),
            spec(vector(&[1.0, 1.0])),
            vector(&[1.0, 0.0]),
            N,
            solver,
        )
    }

    #[test]
    fn run_applies_first_input_and_pushes_bounds() {
        let mut mpc = mpc_loop(scripted());
        assert_eq!(LoopState::Idle, mpc.state());

        let x0 = vector(&[0.0, 0.0]);
        let record = mpc.run(&x0, 4).unwrap();

        assert_eq!(LoopState::Done, mpc.state());
        assert_eq!(4, record.steps.len());
        assert_eq!(
            vec![
                SolverCall::Dimensions,
                SolverCall::Hessian,
                SolverCall::Gradient,
                SolverCall::ConstraintMatrix,
                SolverCall::Bounds,
                SolverCall::Init,
            ],
            mpc.solver().calls
        );

        let model = double_integrator();
        let u = vector(&[1.0]);
        let mut x = x0.clone();
        for (i, step) in record.steps.iter().enumerate() {
            x = model.propagate(&x, &u);
            assert_eq!(i, step.step);
            assert_eq!(u, step.control);
            assert_eq!(x, step.state);
            assert_float_eq!(
                error_norm(&x, &vector(&[1.0, 0.0])),
                step.error_norm,
                abs <= 1e-12
            );

            // Each pushed bound pins the initial state to the propagated one
            let (lower, upper) = &mpc.solver().updates[i];
            assert_eq!(&[-x[0], -x[1]], &lower[..2]);
            assert_eq!(&[-x[0], -x[1]], &upper[..2]);
        }
        assert_eq!(&x, record.final_state());
        assert_eq!(Some(&x), mpc.x());
        assert_eq!(4, mpc.steps_taken());

        assert_eq!(
            Err(MpcError::NotRunning {
                state: LoopState::Done,
            }),
            mpc.step()
        );
    }

    #[test]
    fn bounds_other_than_initial_state_never_change() {
        let mut mpc = mpc_loop(scripted());
        mpc.run(&vector(&[0.5, -0.5]), 3).unwrap();

        let qp = mpc.qp().unwrap();
        let nx = qp.layout.nx;
        for (l, u) in &mpc.solver().updates {
            assert_eq!(&qp.l.as_slice()[nx..], &l[nx..]);
            assert_eq!(&qp.u.as_slice()[nx..], &u[nx..]);
        }
    }

    #[test]
    fn step_before_initialise() {
        let mut mpc = mpc_loop(scripted());
        assert_eq!(
            Err(MpcError::NotRunning {
                state: LoopState::Idle,
            }),
            mpc.step()
        );
        assert_eq!(LoopState::Idle, mpc.state());
    }

    #[test]
    fn initialise_twice() {
        let mut mpc = mpc_loop(scripted());
        mpc.initialise(&vector(&[0.0, 0.0]), 2).unwrap();
        assert_eq!(LoopState::Initialized, mpc.state());
        mpc.step().unwrap();
        assert_eq!(LoopState::Stepping, mpc.state());

        assert_eq!(
            Err(MpcError::NotIdle {
                state: LoopState::Stepping,
            }),
            mpc.initialise(&vector(&[0.0, 0.0]), 2)
        );
        assert_eq!(LoopState::Stepping, mpc.state());
    }

    #[test]
    fn zero_steps_is_done_immediately() {
        let mut mpc = mpc_loop(scripted());
        let record = mpc.run(&vector(&[2.0, 0.0]), 0).unwrap();
        assert!(record.steps.is_empty());
        assert_eq!(&vector(&[2.0, 0.0]), record.final_state());
        assert_eq!(LoopState::Done, mpc.state());
        assert_eq!(0, mpc.solver().solves);
    }

    #[test]
    fn negative_weight_fails_before_solver_calls() {
        let mut mpc = RecedingHorizonLoop::new(
            double_integrator(),
            ConstraintSpec {
                Q: vector(&[1.0, -1.0]),
                ..spec(vector(&[1.0, 1.0]))
            },
            vector(&[0.0, 0.0]),
            N,
            scripted(),
        );

        assert_eq!(
            Err(MpcError::Configuration(ConfigurationError::NegativeWeight {
                what: "Q",
                index: 1,
                value: -1.0,
            })),
            mpc.run(&vector(&[0.0, 0.0]), 5)
        );
        assert_eq!(LoopState::Failed, mpc.state());
        assert!(mpc.solver().calls.is_empty());
        assert!(mpc.qp().is_none());
    }

    #[test]
    fn zero_horizon_is_rejected() {
        let mut mpc = RecedingHorizonLoop::new(
            double_integrator(),
            spec(vector(&[1.0, 1.0])),
            vector(&[0.0, 0.0]),
            0,
            scripted(),
        );
        assert_eq!(
            Err(MpcError::Configuration(ConfigurationError::ZeroHorizon)),
            mpc.initialise(&vector(&[0.0, 0.0]), 1)
        );
        assert_eq!(LoopState::Failed, mpc.state());
        assert!(mpc.solver().calls.is_empty());
    }

    #[test]
    fn solver_setup_failure_names_the_call() {
        let mut mpc = mpc_loop(ScriptedSolver {
            fail_call: Some(SolverCall::ConstraintMatrix),
            ..scripted()
        });

        assert_eq!(
            Err(MpcError::SolverInit {
                call: SolverCall::ConstraintMatrix,
                source: SolverError::Setup("scripted".into()),
            }),
            mpc.initialise(&vector(&[0.0, 0.0]), 3)
        );
        assert_eq!(LoopState::Failed, mpc.state());
        // Setup stops at the failing call
        assert_eq!(4, mpc.solver().calls.len());
        assert_eq!(
            Err(MpcError::NotRunning {
                state: LoopState::Failed,
            }),
            mpc.step()
        );
    }

    #[test]
    fn solve_failure_keeps_last_valid_state() {
        let mut mpc = mpc_loop(ScriptedSolver {
            fail_solve_at: Some(2),
            ..scripted()
        });
        let x0 = vector(&[0.0, 0.0]);

        let err = mpc.run(&x0, 5).unwrap_err();
        match err {
            MpcError::Solve { step: 2, .. } => {}
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(LoopState::Failed, mpc.state());
        assert_eq!(2, mpc.steps_taken());

        let model = double_integrator();
        let u = vector(&[1.0]);
        let x2 = model.propagate(&model.propagate(&x0, &u), &u);
        assert_eq!(Some(&x2), mpc.x());
        assert_eq!(2, mpc.solver().updates.len());
    }

    #[test]
    fn rejected_bound_update_fails_the_step() {
        let mut mpc = mpc_loop(ScriptedSolver {
            fail_update_at: Some(0),
            ..scripted()
        });
        let x0 = vector(&[0.5, -0.5]);
        mpc.initialise(&x0, 3).unwrap();

        match mpc.step() {
            Err(MpcError::BoundUpdate { step: 0, .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(LoopState::Failed, mpc.state());
        assert_eq!(Some(&x0), mpc.x());
        assert_eq!(0, mpc.steps_taken());

        // The transcribed bounds still describe the last accepted state
        let qp = mpc.qp().unwrap();
        assert_eq!(&[-0.5, 0.5], &qp.l.as_slice()[..2]);
        assert_eq!(&[-0.5, 0.5], &qp.u.as_slice()[..2]);
    }

    #[test]
    fn diverging_state_is_rejected() {
        let mut mpc = mpc_loop(ScriptedSolver {
            control: vec![INFINITY],
            ..scripted()
        });
        mpc.initialise(&vector(&[0.0, 0.0]), 3).unwrap();

        match mpc.step() {
            Err(MpcError::InvalidState { step: 0, .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(LoopState::Failed, mpc.state());
        assert!(mpc.solver().updates.is_empty());
    }

    #[test]
    fn error_norm_is_euclidean() {
        assert_float_eq!(
            5.0,
            error_norm(&vector(&[3.0, 0.0]), &vector(&[0.0, -4.0])),
            abs <= 1e-12
        );
    }
}
