//! Simulation diagnostics module.
//!
//! Samples ensemble observables into Bevy's diagnostic store so they can be
//! logged by `LogDiagnosticsPlugin` or read by other systems:
//!
//! - **Simulated time** since the last `configure`
//! - **Mean radius** of the cloud about the trap axis
//! - **Kinetic energy** of the whole ensemble
//! - **Mean angular velocity**, the average tangential velocity component
//!
//! Samples are taken on a repeating wall-clock timer while the app is running.

use crate::resources::TrapSimulation;
use crate::states::AppState;
use bevy::diagnostic::{
    DEFAULT_MAX_HISTORY_LENGTH, Diagnostic, DiagnosticPath, Diagnostics, RegisterDiagnostic,
};
use bevy::prelude::*;
use core::time::Duration;

#[derive(Resource)]
pub struct SimulationDiagnosticsState {
    update_timer: Timer,
}

pub struct SimulationDiagnosticsPlugin {
    max_history_length: usize,
    smoothing_factor: f64,
    update_interval: Duration,
}

impl Default for SimulationDiagnosticsPlugin {
    fn default() -> Self {
        Self {
            max_history_length: DEFAULT_MAX_HISTORY_LENGTH,
            smoothing_factor: 0.0,
            update_interval: Duration::from_secs(1),
        }
    }
}

impl SimulationDiagnosticsPlugin {
    pub const TIME: DiagnosticPath = DiagnosticPath::const_new("iontrap/time");
    pub const MEAN_RADIUS: DiagnosticPath = DiagnosticPath::const_new("iontrap/mean_radius");
    pub const KINETIC_ENERGY: DiagnosticPath =
        DiagnosticPath::const_new("iontrap/kinetic_energy");
    pub const MEAN_ANGULAR_VELOCITY: DiagnosticPath =
        DiagnosticPath::const_new("iontrap/mean_angular_velocity");

    const DIAGNOSTIC_PATHS: &'static [DiagnosticPath] = &[
        Self::TIME,
        Self::MEAN_RADIUS,
        Self::KINETIC_ENERGY,
        Self::MEAN_ANGULAR_VELOCITY,
    ];

    pub fn with_update_interval(mut self, update_interval: Duration) -> Self {
        self.update_interval = update_interval;
        self
    }

    fn register_diagnostics(&self, app: &mut App) {
        for path in Self::DIAGNOSTIC_PATHS {
            app.register_diagnostic(
                Diagnostic::new(path.clone())
                    .with_max_history_length(self.max_history_length)
                    .with_smoothing_factor(self.smoothing_factor),
            );
        }
    }

    fn update_timer_ticks(mut state: ResMut<SimulationDiagnosticsState>, time: Res<Time>) {
        state.update_timer.tick(time.delta());
    }

    fn record_measurements(
        mut diagnostics: Diagnostics,
        state: Res<SimulationDiagnosticsState>,
        simulation: Res<TrapSimulation>,
    ) {
        if !state.update_timer.just_finished() {
            return;
        }
        record(&mut diagnostics, &simulation);
    }
}

/// Push one sample of every observable
pub fn record(diagnostics: &mut Diagnostics<'_, '_>, simulation: &TrapSimulation) {
    diagnostics.add_measurement(&SimulationDiagnosticsPlugin::TIME, || simulation.time());
    diagnostics.add_measurement(&SimulationDiagnosticsPlugin::MEAN_RADIUS, || {
        simulation.mean_radius()
    });
    diagnostics.add_measurement(&SimulationDiagnosticsPlugin::KINETIC_ENERGY, || {
        simulation.kinetic_energy()
    });
    diagnostics.add_measurement(&SimulationDiagnosticsPlugin::MEAN_ANGULAR_VELOCITY, || {
        let velocities = simulation.angular_velocities();
        if velocities.is_empty() {
            0.0
        } else {
            velocities.iter().sum::<f64>() / velocities.len() as f64
        }
    });
}

impl Plugin for SimulationDiagnosticsPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(SimulationDiagnosticsState {
            update_timer: Timer::new(self.update_interval, TimerMode::Repeating),
        });

        self.register_diagnostics(app);

        app.add_systems(
            Update,
            (Self::update_timer_ticks, Self::record_measurements)
                .chain()
                .run_if(in_state(AppState::Running))
                .run_if(resource_exists::<TrapSimulation>),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::math::Vector;
    use crate::test_utils::{create_test_app, single_particle_simulation};
    use bevy::diagnostic::DiagnosticsStore;
    use bevy::ecs::system::RunSystemOnce;

    #[test]
    fn test_paths_are_registered() {
        let mut app = create_test_app();
        app.add_plugins(SimulationDiagnosticsPlugin::default());

        let store = app.world().resource::<DiagnosticsStore>();
        for path in SimulationDiagnosticsPlugin::DIAGNOSTIC_PATHS {
            assert!(store.get(path).is_some(), "{path} not registered");
        }
    }

    #[test]
    fn test_record_samples_simulation() {
        let mut app = create_test_app();
        app.add_plugins(SimulationDiagnosticsPlugin::default());
        app.insert_resource(TrapSimulation(single_particle_simulation(
            Vector::new(3.0, 4.0, 0.0),
            1.0,
        )));

        app.world_mut()
            .run_system_once(|mut diagnostics: Diagnostics, simulation: Res<TrapSimulation>| {
                record(&mut diagnostics, &simulation);
            })
            .unwrap();

        let store = app.world().resource::<DiagnosticsStore>();
        let radius = store
            .get(&SimulationDiagnosticsPlugin::MEAN_RADIUS)
            .and_then(Diagnostic::value)
            .unwrap();
        assert!((radius - 5.0).abs() < 1e-12);
    }
}
