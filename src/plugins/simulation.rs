//! Drives a [`Simulation`] from the Bevy schedule
//!
//! The plugin builds the simulation at startup from [`SimulationConfig`],
//! advances it by `run.steps_per_tick` sub-steps every fixed update while the
//! app is running, pauses on integration errors, and requests exit once the
//! configured duration has been simulated.

use crate::config::SimulationConfig;
use crate::physics::simulation::Simulation;
use crate::resources::{SharedRng, TrapSimulation};
use crate::states::AppState;
use bevy::prelude::*;

#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum SimulationSet {
    Advance,
    Completion,
}

pub struct TrapSimulationPlugin {
    config: Option<SimulationConfig>,
    start_paused: bool,
}

impl TrapSimulationPlugin {
    pub fn new() -> Self {
        Self {
            config: None,
            start_paused: false,
        }
    }

    pub fn with_config(config: SimulationConfig) -> Self {
        Self {
            config: Some(config),
            start_paused: false,
        }
    }

    pub fn paused(mut self, start_paused: bool) -> Self {
        self.start_paused = start_paused;
        self
    }
}

impl Default for TrapSimulationPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for TrapSimulationPlugin {
    fn build(&self, app: &mut App) {
        let config = self
            .config
            .clone()
            .unwrap_or_else(SimulationConfig::load_from_user_config);

        match config.to_toml() {
            Ok(toml_string) => {
                debug!("=== Current Configuration (TOML) ===\n{}", toml_string);
                debug!("=== End Configuration ===");
            }
            Err(e) => {
                error!("Failed to serialize configuration to TOML: {}", e);
            }
        }

        app.insert_resource(SharedRng::from_optional_seed(config.physics.initial_seed));
        app.insert_resource(config);
        app.insert_state(if self.start_paused {
            AppState::Paused
        } else {
            AppState::Running
        });

        app.configure_sets(
            FixedUpdate,
            (SimulationSet::Advance, SimulationSet::Completion).chain(),
        );

        app.add_systems(Startup, setup_simulation);
        app.add_systems(
            FixedUpdate,
            (
                advance_simulation
                    .in_set(SimulationSet::Advance)
                    .run_if(in_state(AppState::Running)),
                exit_when_complete.in_set(SimulationSet::Completion),
            )
                .run_if(resource_exists::<TrapSimulation>),
        );
    }
}

pub fn setup_simulation(
    mut commands: Commands,
    config: Res<SimulationConfig>,
    mut rng: ResMut<SharedRng>,
    mut next_state: ResMut<NextState<AppState>>,
) {
    match Simulation::from_config(&config, &mut **rng) {
        Ok(simulation) => {
            info!(
                "Simulation ready: {} particles, dt = {:.3e} s, {} sub-steps per tick",
                simulation.ensemble().count(),
                config.run.dt,
                config.run.steps_per_tick
            );
            commands.insert_resource(TrapSimulation(simulation));
        }
        Err(e) => {
            error!("Failed to set up simulation: {e}");
            next_state.set(AppState::Paused);
        }
    }
}

pub fn advance_simulation(
    mut simulation: ResMut<TrapSimulation>,
    config: Res<SimulationConfig>,
    mut next_state: ResMut<NextState<AppState>>,
) {
    if let Err(e) = simulation.advance(config.run.dt, config.run.steps_per_tick) {
        error!(
            "Simulation halted at t = {:.6e} s: {e}. Pausing.",
            simulation.time()
        );
        next_state.set(AppState::Paused);
    }
}

pub fn exit_when_complete(
    simulation: Res<TrapSimulation>,
    config: Res<SimulationConfig>,
    mut exit: EventWriter<AppExit>,
    mut finished: Local<bool>,
) {
    if *finished || config.run.duration <= 0.0 || simulation.time() < config.run.duration {
        return;
    }

    info!(
        "Reached t = {:.6e} s: mean radius {:.4e} m, kinetic energy {:.4e} J",
        simulation.time(),
        simulation.mean_radius(),
        simulation.kinetic_energy()
    );
    exit.write(AppExit::Success);
    *finished = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_app, small_config};

    fn app_with(config: SimulationConfig) -> App {
        let mut app = create_test_app();
        app.add_plugins(TrapSimulationPlugin::with_config(config));
        app.update();
        app
    }

    fn run_fixed_update(app: &mut App) {
        app.world_mut().run_schedule(FixedUpdate);
    }

    #[test]
    fn test_startup_builds_simulation() {
        let app = app_with(small_config());
        let simulation = app.world().resource::<TrapSimulation>();
        assert_eq!(simulation.ensemble().count(), 4);
        assert!(simulation.is_initialized());
    }

    #[test]
    fn test_fixed_update_advances_time() {
        let config = small_config();
        let mut app = app_with(config.clone());

        run_fixed_update(&mut app);
        let time = app.world().resource::<TrapSimulation>().time();
        let expected = config.run.dt * config.run.steps_per_tick as f64;
        assert!((time - expected).abs() < 1e-18);
    }

    #[test]
    fn test_paused_app_does_not_advance() {
        let mut app = create_test_app();
        app.add_plugins(TrapSimulationPlugin::with_config(small_config()).paused(true));
        app.update();

        run_fixed_update(&mut app);
        assert_eq!(app.world().resource::<TrapSimulation>().time(), 0.0);
        assert_eq!(
            *app.world().resource::<State<AppState>>().get(),
            AppState::Paused
        );
    }

    #[test]
    fn test_integration_error_pauses() {
        let mut app = app_with(small_config());
        app.world_mut()
            .resource_mut::<TrapSimulation>()
            .ensemble_mut()
            .masses_mut()[0] = 0.0;

        run_fixed_update(&mut app);
        app.update();
        assert_eq!(
            *app.world().resource::<State<AppState>>().get(),
            AppState::Paused
        );
        assert_eq!(app.world().resource::<TrapSimulation>().time(), 0.0);
    }

    #[test]
    fn test_exit_after_duration() {
        let mut config = small_config();
        config.run.duration = config.run.dt * config.run.steps_per_tick as f64 * 0.5;
        let mut app = app_with(config);

        run_fixed_update(&mut app);
        let exits = app.world().resource::<Events<AppExit>>();
        assert!(!exits.is_empty());
    }
}
