use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;

use control_model::{ConfigurationError, ConstraintSpec, LinearPlantModel};
use controller::{default_settings, Settings};
use prelude::*;

pub static CONFIG_FILE: &'static str = "simulator.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to deserialise simulator config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("rows of {0} have different lengths")]
    RaggedMatrix(&'static str),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

#[derive(Debug, Deserialize)]
pub struct SimulatorConfig {
    pub horizon: usize,
    pub steps: usize,
    /// When set, `model.A` and `model.B` are continuous time and are discretised with this step.
    pub dt: Option<float>,
    #[serde(default)]
    pub profile: bool,
    pub model: ModelConfig,
    pub constraints: ConstraintsConfig,
    pub run: RunConfig,
    #[serde(default)]
    pub solver: SolverConfig,
}

/// Row-major dynamics matrices.
#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    pub A: Vec<Vec<float>>,
    pub B: Vec<Vec<float>>,
}

#[derive(Debug, Deserialize)]
pub struct ConstraintsConfig {
    pub x_min: Vec<float>,
    pub x_max: Vec<float>,
    pub u_min: Vec<float>,
    pub u_max: Vec<float>,
    pub Q: Vec<float>,
    pub R: Vec<float>,
}

#[derive(Debug, Deserialize)]
pub struct RunConfig {
    pub x0: Vec<float>,
    pub x_ref: Vec<float>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SolverConfig {
    pub verbose: Option<bool>,
    pub eps_abs: Option<float>,
    pub eps_rel: Option<float>,
    pub max_iter: Option<u32>,
    pub polish: Option<bool>,
}

impl SimulatorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<SimulatorConfig, ConfigError> {
        let path = path.as_ref();
        let io_error = |source| ConfigError::Io {
            path: path.to_owned(),
            source,
        };

        let mut config_str = String::new();
        File::open(path)
            .map_err(io_error)?
            .read_to_string(&mut config_str)
            .map_err(io_error)?;
        SimulatorConfig::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<SimulatorConfig, ConfigError> {
        Ok(toml::from_str(config_str)?)
    }

    pub fn model(&self) -> Result<LinearPlantModel, ConfigError> {
        let A = matrix_from_rows(&self.model.A).ok_or(ConfigError::RaggedMatrix("A"))?;
        let B = matrix_from_rows(&self.model.B).ok_or(ConfigError::RaggedMatrix("B"))?;
        let model = match self.dt {
            Some(dt) => LinearPlantModel::discretise(dt, &A, &B)?,
            None => LinearPlantModel::new(A, B)?,
        };
        Ok(model)
    }

    pub fn constraints(&self) -> Result<ConstraintSpec, ConfigError> {
        let c = &self.constraints;
        let spec = ConstraintSpec::new(
            Vector::from_column_slice(&c.x_min),
            Vector::from_column_slice(&c.x_max),
            Vector::from_column_slice(&c.u_min),
            Vector::from_column_slice(&c.u_max),
            Vector::from_column_slice(&c.Q),
            Vector::from_column_slice(&c.R),
        )?;
        Ok(spec)
    }

    pub fn x0(&self) -> Vector {
        Vector::from_column_slice(&self.run.x0)
    }

    pub fn x_ref(&self) -> Vector {
        Vector::from_column_slice(&self.run.x_ref)
    }

    /// OSQP settings with any overrides from the `[solver]` table applied.
    pub fn solver_settings(&self) -> Settings {
        let s = &self.solver;
        let mut settings = default_settings();
        if let Some(verbose) = s.verbose {
            settings = settings.verbose(verbose);
        }
        if let Some(eps_abs) = s.eps_abs {
            settings = settings.eps_abs(eps_abs);
        }
        if let Some(eps_rel) = s.eps_rel {
            settings = settings.eps_rel(eps_rel);
        }
        if let Some(max_iter) = s.max_iter {
            settings = settings.max_iter(max_iter);
        }
        if let Some(polish) = s.polish {
            settings = settings.polish(polish);
        }
        settings
    }
}
