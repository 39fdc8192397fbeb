//! Command line interface for iontrap

use crate::config::{ConfigError, SimulationConfig};
use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration file could not be loaded
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[source] ConfigError),

    /// Overrides produced an invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[source] ConfigError),
}

/// iontrap - charged particles in a rotating-wall trap
#[derive(Parser, Debug, Default)]
#[command(
    version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BUILD_DATE"), ")"),
    about,
    long_about = None
)]
pub struct Args {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of particles to simulate (overrides config file)
    #[arg(short = 'n', long, value_name = "COUNT")]
    pub particles: Option<usize>,

    /// Random seed for the initial cloud and heating
    #[arg(short = 's', long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Rotation rate of the wall (rad/s)
    #[arg(long, value_name = "RAD_PER_S")]
    pub omega: Option<f64>,

    /// Integrator sub-step (s)
    #[arg(long, value_name = "SECONDS")]
    pub dt: Option<f64>,

    /// Simulated time to run before exiting (s); 0 runs until interrupted
    #[arg(long, value_name = "SECONDS")]
    pub duration: Option<f64>,

    /// Start paused
    #[arg(short = 'p', long)]
    pub paused: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,

    /// Write the effective configuration to FILE
    #[arg(long, value_name = "FILE")]
    pub save_config: Option<PathBuf>,
}

/// Loads configuration from file or defaults, then applies command-line overrides
pub fn load_and_apply_config(args: &Args) -> Result<SimulationConfig, CliError> {
    let mut config = match &args.config {
        Some(config_path) => {
            println!("Loading configuration from: {}", config_path.display());
            SimulationConfig::load(Some(config_path.as_path())).map_err(CliError::ConfigLoad)?
        }
        None => SimulationConfig::load_from_user_config(),
    };

    if let Some(count) = args.particles {
        println!("Overriding particle count to: {count}");
        config.physics.particle_count = count;
    }

    if let Some(seed) = args.seed {
        println!("Using random seed: {seed}");
        config.physics.initial_seed = Some(seed);
    }

    if let Some(omega) = args.omega {
        println!("Overriding wall rotation rate to: {omega} rad/s");
        config.trap.omega = omega;
    }

    if let Some(dt) = args.dt {
        println!("Overriding time step to: {dt} s");
        config.run.dt = dt;
    }

    if let Some(duration) = args.duration {
        println!("Overriding duration to: {duration} s");
        config.run.duration = duration;
    }

    config.validate().map_err(CliError::InvalidConfig)?;
    Ok(config)
}
