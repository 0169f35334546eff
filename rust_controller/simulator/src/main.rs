// Ignore this lint otherwise many warnings are generated for common mathematical notation
#![allow(non_snake_case)]

extern crate env_logger;
#[macro_use]
extern crate log;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate stats;
extern crate thiserror;
extern crate toml;

extern crate control_model;
extern crate controller;
extern crate prelude;

mod config;
mod flame_merge;

use std::env;
use std::io;
use std::process;
use std::time::Instant;

use thiserror::Error;

use controller::{error_norm, LoopState, MpcError, OsqpSolver, RecedingHorizonLoop};
use prelude::*;

use crate::config::{ConfigError, SimulatorConfig, CONFIG_FILE};

#[derive(Debug, Error)]
enum SimulatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Mpc(#[from] MpcError),
    #[error("unable to write flame graph: {0}")]
    Profile(#[from] io::Error),
}

fn main() {
    env_logger::init();

    let path = env::args().nth(1).unwrap_or_else(|| CONFIG_FILE.to_owned());
    if let Err(err) = run(&path) {
        error!("simulation failed: {}", err);
        process::exit(1);
    }
}

fn run(path: &str) -> Result<(), SimulatorError> {
    let sim_config = SimulatorConfig::load(path)?;
    let model = sim_config.model()?;
    let spec = sim_config.constraints()?;
    let x0 = sim_config.x0();
    let x_ref = sim_config.x_ref();

    let solver = OsqpSolver::with_settings(sim_config.solver_settings());
    let mut mpc = RecedingHorizonLoop::new(model, spec, x_ref.clone(), sim_config.horizon, solver);

    info!(
        "running {} steps with horizon {}, initial error {}",
        sim_config.steps,
        sim_config.horizon,
        error_norm(&x0, &x_ref)
    );
    mpc.initialise(&x0, sim_config.steps)?;

    let mut stats = stats::OnlineStats::new();
    while mpc.state() != LoopState::Done {
        // Start controller timer
        let controller_start = Instant::now();

        let record = mpc.step()?;

        let controller_millis = controller_start.elapsed().as_secs_f64() * 1e3;
        stats.add(controller_millis);

        info!("Step {} took {} ms", record.step, controller_millis);
        info!("State {:?}", record.state.as_slice());
        info!("Control {:?}", record.control.as_slice());
        info!("Error {}", record.error_norm);
    }

    let x: &Vector = mpc.x().unwrap_or(&x0);
    info!("Final error {}", error_norm(x, &x_ref));
    info!(
        "Controller stats (mean/ms, stdev/ms): ({:.3}, {:.3})",
        stats.mean(),
        stats.stddev()
    );

    if sim_config.profile {
        flame_merge::write_flame()?;
    }
    Ok(())
}
