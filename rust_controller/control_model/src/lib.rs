#![allow(non_snake_case)]

#[macro_use]
extern crate log;
extern crate prelude;
extern crate thiserror;

use thiserror::Error;

use prelude::*;

mod expm;
pub use expm::expm;

/// Problems with the description of the control problem. These are detected before any solver
/// call is made.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("{what} has shape {found:?}, expected {expected:?}")]
    DimensionMismatch {
        what: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("{what}[{index}] is not finite ({value})")]
    NonFinite {
        what: &'static str,
        index: usize,
        value: float,
    },
    #[error("{what}[{index}] is NaN")]
    NaN { what: &'static str, index: usize },
    #[error("weight {what}[{index}] = {value} is negative")]
    NegativeWeight {
        what: &'static str,
        index: usize,
        value: float,
    },
    #[error("{what} bounds are inverted at index {index}: min {min} > max {max}")]
    InvertedBounds {
        what: &'static str,
        index: usize,
        min: float,
        max: float,
    },
    #[error("horizon length must be at least 1")]
    ZeroHorizon,
    #[error("time step {0} must be positive and finite")]
    InvalidTimeStep(float),
}

/// Discrete time linear plant `x_{k+1} = A x_k + B u_k`.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearPlantModel {
    A: Matrix,
    B: Matrix,
}

impl LinearPlantModel {
    pub fn new(A: Matrix, B: Matrix) -> Result<LinearPlantModel, ConfigurationError> {
        let nx = A.nrows();
        check_shape("A", (nx, nx), A.shape())?;
        check_shape("B", (nx, B.ncols()), B.shape())?;
        check_finite("A", A.iter())?;
        check_finite("B", B.iter())?;

        Ok(LinearPlantModel { A, B })
    }

    /// Zero-order hold discretisation of the continuous system `dx/dt = A_c x + B_c u`.
    pub fn discretise(
        dt: float,
        A_c: &Matrix,
        B_c: &Matrix,
    ) -> Result<LinearPlantModel, ConfigurationError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(ConfigurationError::InvalidTimeStep(dt));
        }
        let nx = A_c.nrows();
        let nu = B_c.ncols();
        check_shape("A", (nx, nx), A_c.shape())?;
        check_shape("B", (nx, nu), B_c.shape())?;
        check_finite("A", A_c.iter())?;
        check_finite("B", B_c.iter())?;

        // exp([[A B]; [0 0]] * dt) = [[A_d B_d]; [0 I]]
        let mut C = Matrix::zeros(nx + nu, nx + nu);
        C.view_mut((0, 0), (nx, nx)).copy_from(A_c);
        C.view_mut((0, nx), (nx, nu)).copy_from(B_c);
        C *= dt;
        check_finite("A dt", C.iter())?;

        let C_d = match expm(&C) {
            Some(C_d) => C_d,
            None => {
                return Err(ConfigurationError::NonFinite {
                    what: "exp(A dt)",
                    index: 0,
                    value: NAN,
                })
            }
        };
        debug!("discretised model with dt = {}", dt);

        LinearPlantModel::new(
            C_d.view((0, 0), (nx, nx)).into_owned(),
            C_d.view((0, nx), (nx, nu)).into_owned(),
        )
    }

    pub fn nx(&self) -> usize {
        self.A.nrows()
    }

    pub fn nu(&self) -> usize {
        self.B.ncols()
    }

    pub fn A(&self) -> &Matrix {
        &self.A
    }

    pub fn B(&self) -> &Matrix {
        &self.B
    }

    /// Advances the plant one step.
    pub fn propagate(&self, x: &Vector, u: &Vector) -> Vector {
        assert_eq!(x.len(), self.nx(), "state dimension");
        assert_eq!(u.len(), self.nu(), "input dimension");
        &self.A * x + &self.B * u
    }
}

/// Box bounds on the state and input at every horizon step, together with the diagonal cost
/// weights. Bounds may be infinite.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintSpec {
    pub x_min: Vector,
    pub x_max: Vector,
    pub u_min: Vector,
    pub u_max: Vector,
    /// Diagonal of the state weight matrix
    pub Q: Vector,
    /// Diagonal of the input weight matrix
    pub R: Vector,
}

impl ConstraintSpec {
    pub fn new(
        x_min: Vector,
        x_max: Vector,
        u_min: Vector,
        u_max: Vector,
        Q: Vector,
        R: Vector,
    ) -> Result<ConstraintSpec, ConfigurationError> {
        let spec = ConstraintSpec {
            x_min,
            x_max,
            u_min,
            u_max,
            Q,
            R,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// State and input bounds all infinite.
    pub fn unconstrained(Q: Vector, R: Vector) -> Result<ConstraintSpec, ConfigurationError> {
        let nx = Q.len();
        let nu = R.len();
        ConstraintSpec::new(
            Vector::from_element(nx, NEG_INFINITY),
            Vector::from_element(nx, INFINITY),
            Vector::from_element(nu, NEG_INFINITY),
            Vector::from_element(nu, INFINITY),
            Q,
            R,
        )
    }

    pub fn nx(&self) -> usize {
        self.Q.len()
    }

    pub fn nu(&self) -> usize {
        self.R.len()
    }

    /// Checks internal consistency: matching lengths, no NaN bounds, `min <= max` and finite
    /// non-negative weights.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let nx = self.nx();
        let nu = self.nu();
        check_shape("x_min", (nx, 1), self.x_min.shape())?;
        check_shape("x_max", (nx, 1), self.x_max.shape())?;
        check_shape("u_min", (nu, 1), self.u_min.shape())?;
        check_shape("u_max", (nu, 1), self.u_max.shape())?;

        check_weights("Q", &self.Q)?;
        check_weights("R", &self.R)?;
        check_bounds("x", &self.x_min, &self.x_max)?;
        check_bounds("u", &self.u_min, &self.u_max)?;
        Ok(())
    }

    /// Validates the constraints and checks that they have the dimensions of `model`.
    pub fn validate_for(&self, model: &LinearPlantModel) -> Result<(), ConfigurationError> {
        check_shape("Q", (model.nx(), 1), self.Q.shape())?;
        check_shape("R", (model.nu(), 1), self.R.shape())?;
        self.validate()
    }
}

pub fn check_shape(
    what: &'static str,
    expected: (usize, usize),
    found: (usize, usize),
) -> Result<(), ConfigurationError> {
    if expected == found {
        Ok(())
    } else {
        Err(ConfigurationError::DimensionMismatch {
            what,
            expected,
            found,
        })
    }
}

pub fn check_finite<'a, I>(what: &'static str, values: I) -> Result<(), ConfigurationError>
where
    I: IntoIterator<Item = &'a float>,
{
    match first_non_finite(values) {
        Some((index, value)) => Err(ConfigurationError::NonFinite { what, index, value }),
        None => Ok(()),
    }
}

pub fn check_weights(what: &'static str, weights: &Vector) -> Result<(), ConfigurationError> {
    check_finite(what, weights.iter())?;
    match weights.iter().position(|&w| w < 0.0) {
        Some(index) => Err(ConfigurationError::NegativeWeight {
            what,
            index,
            value: weights[index],
        }),
        None => Ok(()),
    }
}

fn check_bounds(what: &'static str, min: &Vector, max: &Vector) -> Result<(), ConfigurationError> {
    if let Some(index) = first_nan(min.iter().chain(max.iter())) {
        return Err(ConfigurationError::NaN {
            what,
            index: index % min.len(),
        });
    }
    match min.iter().zip(max.iter()).position(|(lo, hi)| lo > hi) {
        Some(index) => Err(ConfigurationError::InvertedBounds {
            what,
            index,
            min: min[index],
            max: max[index],
        }),
        None => Ok(()),
    }
}
