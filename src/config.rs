//! Simulation configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables of the form `IONTRAP__SECTION__FIELD` (for example
//! `IONTRAP__RUN__DT=5e-10`).

use crate::physics::integrators::DampingCoefficients;
use crate::physics::math::Scalar;
use crate::physics::trap::TrapConfiguration;
use bevy::log::{debug, info, warn};
use bevy::prelude::Resource;
use directories::ProjectDirs;
use iontrap_macros::ConfigDefaults;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const ENV_PREFIX: &str = "IONTRAP";
const ENV_SEPARATOR: &str = "__";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration values: {}", .fields.join(", "))]
    Invalid { fields: Vec<String> },
}

#[derive(Resource, ConfigDefaults, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    #[default(PhysicsConfig::default())]
    #[nested]
    pub physics: PhysicsConfig,

    #[default(TrapConfiguration::default())]
    #[nested]
    pub trap: TrapConfiguration,

    #[default(RunConfig::default())]
    #[nested]
    pub run: RunConfig,
}

/// Particle cloud and force parameters
#[derive(ConfigDefaults, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PhysicsConfig {
    #[default(100)]
    #[positive]
    pub particle_count: usize,

    #[default(None)]
    pub initial_seed: Option<u64>,

    /// Charge per particle (C), one elementary charge by default
    #[default(1.602_176_634e-19)]
    pub charge: Scalar,

    /// Mass per particle (kg), a beryllium-9 ion by default
    #[default(1.496_508_7e-26)]
    #[positive]
    pub mass: Scalar,

    /// Radius of the initial disk (m)
    #[default(1.0e-4)]
    #[positive]
    pub seed_radius: Scalar,

    /// Axial extent of the initial disk (m)
    #[default(1.0e-6)]
    #[non_negative]
    pub seed_thickness: Scalar,

    /// Start particles co-rotating with the trap
    #[default(false)]
    pub spin_up: bool,

    #[default(8.987_551_792_3e9)]
    #[non_negative]
    pub coulomb_constant: Scalar,

    #[default(DampingCoefficients::default())]
    #[nested]
    pub damping: DampingCoefficients,

    /// Velocity change per scattered photon (m/s)
    #[default(0.1)]
    #[non_negative]
    pub recoil_velocity: Scalar,

    /// Photon scattering rate per particle (1/s); zero disables heating
    #[default(0.0)]
    #[non_negative]
    pub scatter_rate: Scalar,

    /// Linear drag coefficient (1/s); zero disables friction
    #[default(0.0)]
    #[non_negative]
    pub friction_coefficient: Scalar,
}

/// How the headless app drives the integrator
#[derive(ConfigDefaults, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Integrator sub-step (s)
    #[default(1.0e-9)]
    #[positive]
    pub dt: Scalar,

    /// Sub-steps per fixed-update tick
    #[default(100)]
    #[positive]
    pub steps_per_tick: usize,

    /// Simulated time after which the app exits (s); zero runs until interrupted
    #[default(1.0e-4)]
    #[non_negative]
    pub duration: Scalar,

    /// Wall-clock seconds between diagnostic samples
    #[default(1.0)]
    #[positive]
    pub diagnostics_interval: f64,
}

impl SimulationConfig {
    /// Load layered configuration, with `path` as the file layer.
    ///
    /// A missing file is an error when `path` is given; environment overrides
    /// apply either way.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, falling back to defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(Some(path)) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config file {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Load from the platform config directory if a file exists there
    pub fn load_from_user_config() -> Self {
        match Self::user_config_path() {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::load_or_default(path)
            }
            _ => {
                debug!("No user configuration file found");
                Self::load(None).unwrap_or_else(|e| {
                    warn!("Ignoring environment overrides: {e}");
                    Self::default()
                })
            }
        }
    }

    /// `config.toml` inside the platform config directory
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "iontrap").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values outside their documented ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut fields = self.invalid_fields();
        if !self.trap.is_finite() {
            fields.push("trap".to_string());
        }

        if fields.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { fields })
        }
    }
}
