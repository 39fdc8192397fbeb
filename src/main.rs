use bevy::app::ScheduleRunnerPlugin;
use bevy::diagnostic::{
    DiagnosticsPlugin, LogDiagnosticsPlugin, SystemInformationDiagnosticsPlugin,
};
use bevy::log::{Level, LogPlugin};
use bevy::prelude::*;
use bevy::state::app::StatesPlugin;
use clap::Parser;
use iontrap::cli::{Args, load_and_apply_config};
use iontrap::plugins::simulation::TrapSimulationPlugin;
use iontrap::plugins::simulation_diagnostics::SimulationDiagnosticsPlugin;
use std::time::Duration;

fn main() -> AppExit {
    let args = Args::parse();

    let config = match load_and_apply_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return AppExit::error();
        }
    };

    if let Some(path) = &args.save_config {
        if let Err(e) = config.save(path) {
            eprintln!("Error: {e}");
            return AppExit::error();
        }
        println!("Saved configuration to: {}", path.display());
    }

    if args.print_config {
        return match config.to_toml() {
            Ok(toml_string) => {
                print!("{toml_string}");
                AppExit::Success
            }
            Err(e) => {
                eprintln!("Error: {e}");
                AppExit::error()
            }
        };
    }

    let diagnostics_interval = Duration::from_secs_f64(config.run.diagnostics_interval);

    let mut app = App::new();
    app.add_plugins((
        MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(
            1.0 / 64.0,
        ))),
        LogPlugin {
            level: if args.verbose {
                Level::DEBUG
            } else {
                Level::INFO
            },
            ..default()
        },
        StatesPlugin,
        DiagnosticsPlugin,
        SystemInformationDiagnosticsPlugin,
        LogDiagnosticsPlugin {
            wait_duration: diagnostics_interval,
            ..default()
        },
        SimulationDiagnosticsPlugin::default().with_update_interval(diagnostics_interval),
        TrapSimulationPlugin::with_config(config).paused(args.paused),
    ));

    app.run()
}
