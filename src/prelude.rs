//! iontrap prelude module
//!
//! Re-exports the types most callers need to build and drive a simulation.

pub use bevy::prelude::*;
pub use rand::Rng;

pub use crate::config::{PhysicsConfig, RunConfig, SimulationConfig};
pub use crate::error::SimulationError;
pub use crate::physics::accelerations::{
    AccelerationList, AccelerationSource, CoulombAcceleration, FrictionAcceleration,
    HeatingAcceleration, TrapAcceleration,
};
pub use crate::physics::device::{CommandQueue, ComputeContext};
pub use crate::physics::ensemble::{Particle, ParticleEnsemble};
pub use crate::physics::integrators::{BendKickUpdater, DampingCoefficients};
pub use crate::physics::math::{Scalar, Vector};
pub use crate::physics::simulation::Simulation;
pub use crate::physics::trap::TrapConfiguration;
pub use crate::resources::{SharedRng, TrapSimulation};
pub use crate::states::AppState;
