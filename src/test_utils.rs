//! Test utilities for simulation and plugin testing

use crate::config::SimulationConfig;
use crate::physics::device::{CommandQueue, ComputeContext};
use crate::physics::ensemble::Particle;
use crate::physics::integrators::DampingCoefficients;
use crate::physics::math::{Scalar, Vector};
use crate::physics::simulation::Simulation;
use crate::physics::trap::TrapConfiguration;
use bevy::prelude::*;
use std::sync::Arc;

/// Creates a minimal headless app with the plugins the simulation needs
pub fn create_test_app() -> App {
    let mut app = App::new();

    app.add_plugins((
        MinimalPlugins,
        bevy::state::app::StatesPlugin,
        bevy::diagnostic::DiagnosticsPlugin,
    ));

    app
}

/// A small compute context so chunking is exercised even for tiny ensembles
pub fn test_device() -> (Arc<ComputeContext>, Arc<CommandQueue>) {
    let context = Arc::new(ComputeContext::with_threads(2).with_work_group_size(2));
    let queue = Arc::new(CommandQueue::new(Arc::clone(&context)));
    (context, queue)
}

/// Simulation over the given particles in `trap`
///
/// Uses a unit Coulomb constant and a fixed seed. The device is not initialized.
pub fn simulation_with(
    particles: impl IntoIterator<Item = Particle>,
    trap: TrapConfiguration,
) -> Simulation {
    let (context, queue) = test_device();
    let mut simulation = Simulation::with_device(context, queue)
        .with_seed(0x5eed)
        .with_coulomb_constant(1.0);
    simulation.ensemble_mut().extend(particles);
    simulation.configure(trap, DampingCoefficients::NONE, None, None);
    simulation
}

/// A single particle of unit charge and mass at `position`, initialized
pub fn single_particle_simulation(position: Vector, omega: Scalar) -> Simulation {
    let mut simulation = simulation_with(
        [Particle::at_rest(position, 1.0, 1.0)],
        TrapConfiguration::rotation_only(omega),
    );
    simulation
        .initialize()
        .expect("single particle ensemble is consistent");
    simulation
}

/// Two unit charges at `±separation/2` on the x axis, initialized
pub fn two_particle_simulation(separation: Scalar, trap: TrapConfiguration) -> Simulation {
    let half = 0.5 * separation;
    let mut simulation = simulation_with(
        [
            Particle::at_rest(Vector::new(-half, 0.0, 0.0), 1.0, 1.0),
            Particle::at_rest(Vector::new(half, 0.0, 0.0), 1.0, 1.0),
        ],
        trap,
    );
    simulation
        .initialize()
        .expect("two particle ensemble is consistent");
    simulation
}

/// A configuration small enough to step inside unit tests
pub fn small_config() -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.physics.particle_count = 4;
    config.physics.initial_seed = Some(7);
    config.run.dt = 1.0e-9;
    config.run.steps_per_tick = 5;
    config
}
